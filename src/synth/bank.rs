//! Instrument bank resolution and decoding.
//!
//! A bank identifier either names the built-in patch bank (`builtin`, or `builtin:<patch>` for
//! a single patch) or a resource that a [`BankSource`] turns into SoundFont bytes.

use std::fmt;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use rustysynth::SoundFont;

use super::patches::ProgramTable;
use super::sounds;
use crate::error::BankError;

/// Identifier of the built-in patch bank.
pub const BUILTIN_BANK: &str = "builtin";

/// Resolves a bank identifier to raw bytes.
pub trait BankSource: Send + Sync {
    fn resolve(&self, identifier: &str) -> Result<Vec<u8>, BankError>;
}

/// Resolves identifiers as paths relative to an asset directory.
#[derive(Clone, Debug)]
pub struct AssetDir {
    root: PathBuf,
}

impl AssetDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BankSource for AssetDir {
    fn resolve(&self, identifier: &str) -> Result<Vec<u8>, BankError> {
        let relative = Path::new(identifier);
        // Keep lookups inside the asset directory.
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(BankError::FileNotFound(identifier.to_owned()));
        }
        let path = self.root.join(relative);
        std::fs::read(&path).map_err(|e| {
            log::debug!("cannot read {}: {e}", path.display());
            BankError::FileNotFound(identifier.to_owned())
        })
    }
}

/// A source with nothing in it; only the built-in bank can be loaded.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAssets;

impl BankSource for NoAssets {
    fn resolve(&self, identifier: &str) -> Result<Vec<u8>, BankError> {
        Err(BankError::FileNotFound(identifier.to_owned()))
    }
}

/// A decoded bank, ready to drive an engine.
#[derive(Clone)]
pub enum InstrumentBank {
    SoundFont { name: String, font: Arc<SoundFont> },
    Patches { name: String, table: ProgramTable },
}

impl fmt::Debug for InstrumentBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentBank")
            .field("name", &self.name())
            .field("programs", &self.programs())
            .finish()
    }
}

impl InstrumentBank {
    /// Resolves and decodes `identifier`.
    pub fn load(source: &dyn BankSource, identifier: &str) -> Result<Self, BankError> {
        if let Some(patch) = builtin_selector(identifier) {
            let table = match patch {
                None => sounds::options(),
                Some(name) => sounds::find(name),
            };
            if table.is_empty() {
                return Err(BankError::FileNotFound(identifier.to_owned()));
            }
            return Ok(Self::Patches {
                name: identifier.to_owned(),
                table,
            });
        }
        let bytes = source.resolve(identifier)?;
        Self::decode(identifier, &bytes)
    }

    /// Decodes SoundFont bytes.
    pub fn decode(identifier: &str, bytes: &[u8]) -> Result<Self, BankError> {
        let font = SoundFont::new(&mut Cursor::new(bytes)).map_err(|e| BankError::DecodeError {
            bank: identifier.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self::SoundFont {
            name: identifier.to_owned(),
            font: Arc::new(font),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::SoundFont { name, .. } | Self::Patches { name, .. } => name,
        }
    }

    /// Program names, in the order Program Change addresses them.
    pub fn programs(&self) -> Vec<String> {
        match self {
            Self::SoundFont { font, .. } => {
                let mut presets: Vec<_> = font
                    .get_presets()
                    .iter()
                    .map(|p| (p.get_bank_number(), p.get_patch_number(), p.get_name().to_owned()))
                    .collect();
                presets.sort();
                presets.into_iter().map(|(_, _, name)| name).collect()
            }
            Self::Patches { table, .. } => table.iter().map(|(name, _)| name.clone()).collect(),
        }
    }
}

/// `Some(None)` for the whole built-in bank, `Some(Some(patch))` for one patch, `None` for any
/// other identifier.
fn builtin_selector(identifier: &str) -> Option<Option<&str>> {
    let rest = identifier.trim().strip_prefix(BUILTIN_BANK)?;
    if rest.is_empty() {
        Some(None)
    } else {
        rest.strip_prefix(':').map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_bank_needs_no_assets() {
        let bank = InstrumentBank::load(&NoAssets, "builtin").unwrap();
        assert_eq!(bank.name(), "builtin");
        assert_eq!(bank.programs().len(), sounds::options().len());
    }

    #[test]
    fn builtin_single_patch() {
        let bank = InstrumentBank::load(&NoAssets, "builtin:sine").unwrap();
        assert_eq!(bank.programs(), ["Sine"]);
        assert!(matches!(
            InstrumentBank::load(&NoAssets, "builtin:kazoo"),
            Err(BankError::FileNotFound(_))
        ));
    }

    #[test]
    fn builtin_prefix_needs_separator() {
        assert_eq!(builtin_selector("builtins.sf2"), None);
        assert_eq!(builtin_selector("builtin"), Some(None));
        assert_eq!(builtin_selector("builtin:Pulse"), Some(Some("Pulse")));
    }

    #[test]
    fn missing_asset_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let assets = AssetDir::new(dir.path());
        match InstrumentBank::load(&assets, "KawaiStereoGrand.sf3") {
            Err(BankError::FileNotFound(name)) => assert_eq!(name, "KawaiStereoGrand.sf3"),
            other => panic!("expected FileNotFound, got {other:?}"),
        }
    }

    #[test]
    fn paths_cannot_escape_asset_dir() {
        let dir = tempfile::tempdir().unwrap();
        let assets = AssetDir::new(dir.path().join("assets"));
        std::fs::write(dir.path().join("secret.sf2"), b"RIFF").unwrap();
        assert!(matches!(
            assets.resolve("../secret.sf2"),
            Err(BankError::FileNotFound(_))
        ));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.sf2"), b"definitely not a soundfont").unwrap();
        let assets = AssetDir::new(dir.path());
        assert!(matches!(
            InstrumentBank::load(&assets, "broken.sf2"),
            Err(BankError::DecodeError { .. })
        ));
    }
}
