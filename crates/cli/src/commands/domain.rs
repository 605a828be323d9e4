//! `lorekeep domain`: Load a domain file and describe it.

use lorekeep_config::DomainFile;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use super::{domain_path, load_config};

pub fn run(config_path: Option<&Path>, path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let path = domain_path(&config, path)?;
    let domain = DomainFile::load(&path)?;
    print!("{}", describe(&domain));
    Ok(())
}

fn describe(domain: &DomainFile) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Domain:     {}", domain.name);
    if !domain.description.is_empty() {
        let _ = writeln!(out, "            {}", domain.description);
    }
    let _ = writeln!(out, "Evolution:  {:?}", domain.evolution_mode);
    let _ = writeln!(
        out,
        "Persona:    {} ({}, {})",
        domain.persona.name, domain.persona.tonality, domain.persona.language
    );
    let _ = writeln!(out);
    for category in &domain.categories {
        let _ = writeln!(out, "  {} — {}", category.id, category.label);
        if !category.description.is_empty() {
            let _ = writeln!(out, "      {}", category.description);
        }
        if !category.required_fields.is_empty() {
            let _ = writeln!(out, "      required: {}", category.required_fields.join(", "));
        }
        if !category.optional_fields.is_empty() {
            let _ = writeln!(out, "      optional: {}", category.optional_fields.join(", "));
        }
    }
    out
}
