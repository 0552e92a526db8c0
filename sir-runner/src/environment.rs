//! Run envelope: `{"input", "output"}` JSON on stdin or a TOML/JSON config
//! file, with outputs going to a directory or stdout.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("no input on stdin")]
    EmptyInput,
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: String, source: io::Error },
    #[error("invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid TOML input: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, EnvironmentError>;

pub struct Environment<I = ()> {
    input_json: serde_json::Map<String, Value>,
    pub input: Option<I>,
    output: Value,
    output_dir_override: Option<PathBuf>,
}

impl Environment {
    pub fn from_json(data: Value) -> Self {
        let input_json = data
            .get("input")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        let output = data.get("output").cloned().unwrap_or(Value::Null);
        Self {
            input_json,
            input: None,
            output,
            output_dir_override: None,
        }
    }

    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut raw = String::new();
        reader
            .read_to_string(&mut raw)
            .map_err(|source| EnvironmentError::Read {
                path: "stdin".to_string(),
                source,
            })?;
        if raw.trim().is_empty() {
            return Err(EnvironmentError::EmptyInput);
        }
        let data: Value = serde_json::from_str(&raw)?;
        Ok(Self::from_json(data))
    }

    pub fn from_stdin() -> Result<Self> {
        Self::from_reader(io::stdin().lock())
    }

    /// Loads a `.toml` or `.json` file. A document without an `input`
    /// section is taken to be the input itself.
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| EnvironmentError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let data: Value = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&raw)?,
            _ => serde_json::from_str(&raw)?,
        };
        if data.get("input").is_some() {
            Ok(Self::from_json(data))
        } else {
            Ok(Self::from_json(serde_json::json!({ "input": data })))
        }
    }

    pub fn with_input_type<I: DeserializeOwned>(self) -> Result<Environment<I>> {
        let input_value = Value::Object(self.input_json.clone());
        let input = serde_json::from_value(input_value)?;
        Ok(Environment {
            input_json: self.input_json,
            input: Some(input),
            output: self.output,
            output_dir_override: self.output_dir_override,
        })
    }
}

impl<I> Environment<I> {
    pub fn input_json(&self) -> &serde_json::Map<String, Value> {
        &self.input_json
    }

    /// SHA-256 of the input section. Keys are sorted, so the digest does not
    /// depend on their order in the source document.
    pub fn input_digest(&self) -> String {
        let encoded = Value::Object(self.input_json.clone()).to_string();
        hex::encode(Sha256::digest(encoded.as_bytes()))
    }

    pub fn set_output_dir(&mut self, dir: PathBuf) {
        self.output_dir_override = Some(dir);
    }

    pub fn output_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.output_dir_override {
            return Some(dir.clone());
        }
        let output = &self.output;

        // Flat output section
        if output.get("spec").and_then(|v| v.as_str()) == Some("filesystem") {
            return output
                .get("dir")
                .and_then(|v| v.as_str())
                .map(PathBuf::from);
        }

        // Profiled output: the `default` profile, else the first one
        if let Some(profiles) = output.get("profile").and_then(|v| v.as_object()) {
            let selected = profiles
                .get("default")
                .or_else(|| profiles.values().next());
            if let Some(profile) = selected
                && profile.get("spec").and_then(|v| v.as_str()) == Some("filesystem")
            {
                return profile
                    .get("dir")
                    .and_then(|v| v.as_str())
                    .map(PathBuf::from);
            }
        }

        None
    }

    fn create_output_file(&self, dir: &Path, filename: &str) -> Result<fs::File> {
        let write_error = |source| EnvironmentError::Write {
            path: dir.join(filename).display().to_string(),
            source,
        };
        fs::create_dir_all(dir).map_err(write_error)?;
        fs::File::create(dir.join(filename)).map_err(write_error)
    }

    pub fn write(&self, filename: &str, data: &[u8]) -> Result<()> {
        let write_error = |source| EnvironmentError::Write {
            path: filename.to_string(),
            source,
        };
        match self.output_dir() {
            Some(dir) => self
                .create_output_file(&dir, filename)?
                .write_all(data)
                .map_err(write_error),
            None => io::stdout().lock().write_all(data).map_err(write_error),
        }
    }

    pub fn write_csv<R>(&self, filename: &str, headers: &[R], rows: &[Vec<String>]) -> Result<()>
    where
        R: AsRef<[u8]>,
    {
        match self.output_dir() {
            Some(dir) => {
                let file = self.create_output_file(&dir, filename)?;
                write_records(csv::Writer::from_writer(file), headers, rows)
            }
            None => write_records(csv::Writer::from_writer(io::stdout().lock()), headers, rows),
        }
    }
}

fn write_records<W: Write, R: AsRef<[u8]>>(
    mut wtr: csv::Writer<W>,
    headers: &[R],
    rows: &[Vec<String>],
) -> Result<()> {
    wtr.write_record(headers)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}
