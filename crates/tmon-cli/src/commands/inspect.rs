use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tmon_sink::VerifyResult;

pub fn config_hash(paths: &[PathBuf]) -> Result<()> {
    let loaded = tmon_config::load_layered_yaml(paths)?;
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    Ok(())
}

pub fn verify_log(path: &Path) -> Result<()> {
    match tmon_sink::verify_hash_chain(path)? {
        VerifyResult::Valid { lines } => {
            println!("chain_valid=true lines={lines}");
            Ok(())
        }
        VerifyResult::Broken { line, reason } => {
            println!("chain_valid=false line={line}");
            bail!("verdict log {:?} broken at line {line}: {reason}", path)
        }
    }
}

pub fn list_policies() {
    for meta in tmon_policies::builtin_registry().list() {
        println!(
            "policy={} version={} description={:?}",
            meta.name, meta.version, meta.description
        );
    }
}
