//! Compile command implementation.

use anyhow::{Context, Result};
use sigaddr::{CompiledSignature, compile};

/// Run the compile command
pub fn run(pattern: &str, offset: Option<u32>, name: Option<&str>) -> Result<()> {
    let signature = compile(pattern, offset)
        .with_context(|| format!("Failed to compile {}", name.unwrap_or(pattern)))?;

    if let Some(name) = name {
        println!("Name:     {}", name);
    }
    for line in describe(&signature) {
        println!("{}", line);
    }
    Ok(())
}

fn describe(signature: &CompiledSignature) -> Vec<String> {
    let mut lines = vec![
        format!("Pattern:  {}", signature.padded_pattern()),
        format!(
            "Length:   {} bytes ({} padded)",
            signature.raw_len(),
            signature.padded_len()
        ),
        format!("Offset:   {}", signature.resolution_offset()),
        format!("Mode:     {}", signature.mode()),
        format!("Idiom:    {}", signature.idiom()),
        String::new(),
    ];
    lines.extend(
        signature
            .data()
            .iter()
            .zip(signature.mask())
            .enumerate()
            .map(|(i, (data, mask))| format!("[{}] data 0x{:016X}  mask 0x{:016X}", i, data, mask)),
    );
    lines
}
