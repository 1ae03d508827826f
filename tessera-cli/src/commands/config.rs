//! Check-config command

use super::format_size;
use anyhow::Result;
use std::path::Path;
use tessera_core::config::DatabaseUrl;
use tessera_core::Config;

/// Print what the validated configuration resolves to
pub fn check(path: &Path, cfg: &Config) -> Result<()> {
    let redundancy = cfg.redundancy_scheme()?;
    let encryption = cfg.encryption_scheme(&redundancy)?;
    let overlay = DatabaseUrl::parse(&cfg.overlay.database_url)?;
    let pointers = DatabaseUrl::parse(&cfg.pointers.database_url)?;

    println!("Configuration: {}", path.display());
    println!();
    println!("[redundancy]");
    println!(
        "  shares          k={} m={} o={} n={}",
        redundancy.required_shares(),
        redundancy.repair_shares(),
        redundancy.optimal_shares(),
        redundancy.total_shares()
    );
    println!("  share size      {}", format_size(redundancy.share_size() as u64));
    println!("  stripe size     {}", format_size(redundancy.stripe_size() as u64));
    println!(
        "  expansion       {:.2}x",
        redundancy.total_shares() as f64 / redundancy.required_shares() as f64
    );
    println!();
    println!("[encryption]");
    println!("  data cipher     {}", encryption.cipher());
    println!("  path cipher     {:?}", cfg.encryption.path_type);
    println!("  block size      {}", format_size(encryption.block_size() as u64));
    println!(
        "  key             {}",
        if cfg.encryption.key.is_empty() { "(empty)" } else { "(set)" }
    );
    println!();
    println!("[client]");
    println!("  segment size    {}", format_size(cfg.client.segment_size));
    println!("  inline limit    {}", format_size(cfg.client.max_inline_size as u64));
    println!("  pipeline depth  {}", cfg.client.pipeline_depth);
    println!("  piece timeout   {:?}", cfg.client.piece_timeout());
    println!();
    println!("[overlay]");
    println!("  database        {:?} at {}", overlay.scheme, overlay.location);
    println!("  refresh every   {:?}", cfg.overlay.refresh_interval());
    println!();
    println!("[pointers]");
    println!("  database        {:?} at {}", pointers.scheme, pointers.location);
    println!();
    println!("Configuration is valid");
    Ok(())
}
