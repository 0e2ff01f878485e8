use std::io::{self, Write};

use serde::Serialize;

use crate::archive::Manifest;

#[derive(Debug, Clone, Serialize)]
pub struct UnpackResult {
    pub archive: String,
    pub target: String,
    pub extracted: usize,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_manifest(manifest: &Manifest) -> io::Result<()> {
        Self::print_json(manifest)
    }

    pub fn print_unpack(result: &UnpackResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
