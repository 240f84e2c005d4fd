//! Rendering the transient torrc for a Snowflake-bridged tor.

use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use super::TransportTemplate;
use crate::error::{BootstrapError, Result};

/// Transport name used in `ClientTransportPlugin` and `Bridge` lines.
const TRANSPORT_NAME: &str = "snowflake";

/// Prefix for the temporary torrc file.
const TORRC_PREFIX: &str = "torrc-snowflake-";

/// Renders a [`TransportTemplate`] into a fresh on-disk torrc.
#[derive(Debug, Clone)]
pub struct TransportConfigBuilder {
    template: TransportTemplate,
}

impl TransportConfigBuilder {
    pub fn new(template: TransportTemplate) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &TransportTemplate {
        &self.template
    }

    /// Render the torrc text.
    pub fn render(&self) -> String {
        let t = &self.template;
        let sf = &t.snowflake;
        let mut out = String::new();

        // Writing to a String cannot fail.
        let _ = writeln!(out, "UseBridges {}", u8::from(t.use_bridges));
        let _ = writeln!(out, "DataDirectory {}", t.data_dir.display());
        out.push('\n');

        let _ = writeln!(
            out,
            "ClientTransportPlugin {} exec {} \\",
            TRANSPORT_NAME, sf.client_path
        );
        let _ = writeln!(out, "-url {} -front {} \\", sf.broker_url, sf.front);
        let _ = writeln!(out, "-ice {} \\", sf.ice_servers.join(","));
        match &sf.log_file {
            Some(log) => {
                let _ = writeln!(out, "-max {} -log {}", sf.max_peers, log.display());
            }
            None => {
                let _ = writeln!(out, "-max {}", sf.max_peers);
            }
        }
        out.push('\n');

        for bridge in &sf.bridges {
            let _ = writeln!(out, "Bridge {} {}", TRANSPORT_NAME, bridge);
        }
        out
    }

    /// Validate, render and write the torrc to a uniquely named temp file.
    pub fn build(&self) -> Result<TransportConfig> {
        self.template.validate().map_err(BootstrapError::Config)?;

        let contents = self.render();
        let mut file = tempfile::Builder::new()
            .prefix(TORRC_PREFIX)
            .tempfile()
            .map_err(BootstrapError::ConfigWrite)?;
        file.write_all(contents.as_bytes())
            .map_err(BootstrapError::ConfigWrite)?;
        file.flush().map_err(BootstrapError::ConfigWrite)?;

        debug!("Wrote transport configuration to {}", file.path().display());
        Ok(TransportConfig { file, contents })
    }

    /// Create the tor data directory with owner-only permissions.
    ///
    /// An existing directory is used as is; only a directory created here
    /// has its mode changed.
    pub fn prepare_data_dir(&self) -> Result<()> {
        let dir = &self.template.data_dir;
        if dir.is_dir() {
            debug!("Using existing tor data directory {}", dir.display());
            return Ok(());
        }
        fs::create_dir_all(dir).map_err(BootstrapError::ConfigWrite)?;

        // tor refuses a data directory readable by others
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
                .map_err(BootstrapError::ConfigWrite)?;
        }
        Ok(())
    }
}

/// A rendered torrc living in a temporary file.
///
/// The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct TransportConfig {
    file: NamedTempFile,
    contents: String,
}

impl TransportConfig {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    /// Delete the file now, reporting any error.
    pub fn remove(self) -> Result<()> {
        self.file.close().map_err(BootstrapError::ConfigWrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixed_template() -> TransportTemplate {
        TransportTemplate {
            data_dir: PathBuf::from("datadir"),
            ..Default::default()
        }
    }

    #[test]
    fn test_render_reference_torrc() {
        let builder = TransportConfigBuilder::new(fixed_template());
        let expected = "UseBridges 1\n\
DataDirectory datadir\n\
\n\
ClientTransportPlugin snowflake exec ./snowflake-client \\\n\
-url https://snowflake-broker.torproject.net.global.prod.fastly.net/ -front cdn.sstatic.net \\\n\
-ice stun:stun.voip.blackberry.com:3478,stun:stun.altar.com.pl:3478,stun:stun.antisip.com:3478,stun:stun.bluesip.net:3478,stun:stun.dus.net:3478,stun:stun.epygi.com:3478,stun:stun.sonetel.com:3478,stun:stun.sonetel.net:3478,stun:stun.stunprotocol.org:3478,stun:stun.uls.co.za:3478,stun:stun.voipgate.com:3478,stun:stun.voys.nl:3478 \\\n\
-max 3\n\
\n\
Bridge snowflake 0.0.3.0:1\n";
        assert_eq!(builder.render(), expected);
    }

    #[test]
    fn test_render_log_file_and_multiple_bridges() {
        let mut template = fixed_template();
        template.use_bridges = false;
        template.snowflake.log_file = Some(PathBuf::from("/tmp/snowflake.log"));
        template.snowflake.bridges = vec!["0.0.3.0:1".into(), "192.0.2.4:80 8838024498816A039FCBBAB14E6F40A0843051FA".into()];

        let rendered = TransportConfigBuilder::new(template).render();
        assert!(rendered.starts_with("UseBridges 0\n"));
        assert!(rendered.contains("-max 3 -log /tmp/snowflake.log\n"));
        assert!(rendered.ends_with(
            "Bridge snowflake 0.0.3.0:1\nBridge snowflake 192.0.2.4:80 8838024498816A039FCBBAB14E6F40A0843051FA\n"
        ));
    }

    #[test]
    fn test_build_writes_rendered_contents() {
        let builder = TransportConfigBuilder::new(fixed_template());
        let config = builder.build().unwrap();

        let on_disk = fs::read_to_string(config.path()).unwrap();
        assert_eq!(on_disk, builder.render());
        assert_eq!(config.contents(), on_disk);

        let name = config.path().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with(TORRC_PREFIX));
    }

    #[test]
    fn test_concurrent_builds_get_distinct_paths() {
        let builder = TransportConfigBuilder::new(fixed_template());
        let configs: Vec<TransportConfig> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| builder.build())).collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap().unwrap())
                .collect()
        });

        let paths: std::collections::HashSet<PathBuf> =
            configs.iter().map(|c| c.path().to_path_buf()).collect();
        assert_eq!(paths.len(), configs.len());

        let expected = builder.render();
        for config in &configs {
            assert_eq!(fs::read_to_string(config.path()).unwrap(), expected);
        }
    }

    #[test]
    fn test_build_rejects_invalid_template() {
        let mut template = fixed_template();
        template.snowflake.ice_servers.clear();
        let err = TransportConfigBuilder::new(template).build().unwrap_err();
        assert!(matches!(err, BootstrapError::Config(_)));
    }

    #[test]
    fn test_remove_deletes_file() {
        let config = TransportConfigBuilder::new(fixed_template()).build().unwrap();
        let path = config.path().to_path_buf();
        assert!(path.exists());
        config.remove().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_deletes_file() {
        let path = {
            let config = TransportConfigBuilder::new(fixed_template()).build().unwrap();
            config.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_prepare_data_dir_creates_directory() {
        let scratch = tempfile::tempdir().unwrap();
        let template = TransportTemplate {
            data_dir: scratch.path().join("nested").join("tor"),
            ..Default::default()
        };
        let builder = TransportConfigBuilder::new(template);
        builder.prepare_data_dir().unwrap();
        assert!(builder.template().data_dir.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&builder.template().data_dir)
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_prepare_data_dir_leaves_existing_directory_mode() {
        use std::os::unix::fs::PermissionsExt;

        let scratch = tempfile::tempdir().unwrap();
        let shared = scratch.path().join("shared");
        fs::create_dir(&shared).unwrap();
        fs::set_permissions(&shared, fs::Permissions::from_mode(0o755)).unwrap();

        let builder = TransportConfigBuilder::new(TransportTemplate {
            data_dir: shared.clone(),
            ..Default::default()
        });
        builder.prepare_data_dir().unwrap();

        let mode = fs::metadata(&shared).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
