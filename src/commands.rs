//! CLI command implementations for `hsm`.
//!
//! Each `run_*` function prints to stdout and returns an error for the
//! binary to report. `check`, `node`, and `isic` only read the taxonomy
//! source and never touch the embedding backend.

use anyhow::{Context, Result};

use hs_match_core::models::TaxonomyNode;

use crate::config::Config;
use crate::engine::{ClassifyOptions, Engine, TaxonomySource};

fn source(config: &Config) -> TaxonomySource {
    TaxonomySource {
        path: config.taxonomy.path.clone(),
        format: config.taxonomy.format,
        isic_map_path: config.taxonomy.isic_map_path.clone(),
    }
}

/// `hsm check`: load and validate the taxonomy and ISIC map.
pub fn run_check(config: &Config) -> Result<()> {
    let (taxonomy, isic) = source(config).read()?;

    println!("taxonomy ok: {}", config.taxonomy.path.display());
    println!("  nodes:     {}", taxonomy.len());
    println!("  roots:     {}", taxonomy.roots().count());
    if let Some(level) = taxonomy.max_level() {
        println!("  max level: {}", level);
    }
    if let Some(version) = taxonomy.version() {
        println!("  version:   {}", version);
    }
    if let Some(map) = isic {
        println!("isic map ok: {} codes", map.len());
    }
    Ok(())
}

/// `hsm classify`: classify one description.
pub async fn run_classify(
    config: &Config,
    text: &str,
    options: &ClassifyOptions,
    json: bool,
) -> Result<()> {
    let engine = Engine::from_config(config).await?;
    let result = engine
        .classify_with(text, options)
        .await
        .with_context(|| format!("classification failed for {:?}", text))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.candidates.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    for (i, c) in result.candidates.iter().enumerate() {
        println!("{}. [{:.4}] {}  {}", c.rank, c.score, c.code, c.description);
        if let Some(explain) = &c.explain {
            print!(
                "    raw: {:.4}  boost: {:.4}  level: {}",
                explain.raw_score, explain.boost, explain.level
            );
            if let Some(by) = &explain.boosted_by {
                print!("  boosted by: {}", by);
            }
            println!();
        }
        if let Some(flag) = result.isic_flags.as_ref().and_then(|f| f.get(i)) {
            println!(
                "    isic: chapter {}  heading {}",
                yes_no(flag.in_chapter),
                yes_no(flag.in_heading)
            );
        }
    }
    println!();
    println!("final: {}", result.final_codes.join(", "));
    if options.isic.is_some() && result.isic.is_none() {
        println!("(no ISIC mapping for {})", options.isic.as_deref().unwrap_or(""));
    }
    Ok(())
}

/// `hsm node`: print a node with its ancestors and children.
pub fn run_node(config: &Config, code: &str) -> Result<()> {
    let (taxonomy, _) = source(config).read()?;
    let node = taxonomy
        .lookup(code)
        .with_context(|| format!("node not found: {}", code))?;

    println!("--- Node ---");
    print_node(node);
    println!();

    let ancestors = taxonomy.ancestors(code).unwrap_or_default();
    println!("--- Ancestors ({}) ---", ancestors.len());
    for a in ancestors {
        print_node(a);
    }
    println!();

    let children = taxonomy.children(code).unwrap_or_default();
    println!("--- Children ({}) ---", children.len());
    for c in children {
        print_node(c);
    }
    Ok(())
}

/// `hsm isic`: print the HS codes mapped to an ISIC code.
pub fn run_isic(config: &Config, code: &str) -> Result<()> {
    let (_, isic) = source(config).read()?;
    let map = isic.context("no ISIC map configured (taxonomy.isic_map_path)")?;
    let mapping = map
        .lookup(code)
        .with_context(|| format!("ISIC code not found: {}", code))?;

    println!("isic:  {}", mapping.isic);
    println!("hs02:  {}", mapping.hs02.join(", "));
    println!("hs04:  {}", mapping.hs04.join(", "));
    println!("total: {} codes", mapping.total.len());
    for c in &mapping.total {
        println!("  {}", c);
    }
    Ok(())
}

fn print_node(node: &TaxonomyNode) {
    println!(
        "{}{}  {}",
        "  ".repeat(node.level as usize),
        node.code,
        node.description
    );
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}
