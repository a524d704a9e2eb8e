//! Init-config command implementation.

use crate::config::{write_example, ClientConfig, ConfigFile};
use filesync_server::ServerConfig;
use std::path::Path;

/// Runs the init-config command.
pub fn run(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let client = write_example::<ClientConfig>(dir)?;
    let server = write_example::<ServerConfig>(dir)?;

    println!("Wrote example configuration:");
    println!("  {}", client.display());
    println!("  {}", server.display());
    println!();
    println!(
        "Copy them to {} and {} and edit the values.",
        ClientConfig::path_in(dir).display(),
        ServerConfig::path_in(dir).display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_both_examples() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join("config");
        run(&config_dir).unwrap();
        assert!(ClientConfig::example_path_in(&config_dir).is_file());
        assert!(ServerConfig::example_path_in(&config_dir).is_file());
        assert!(!ClientConfig::path_in(&config_dir).exists());
    }
}
