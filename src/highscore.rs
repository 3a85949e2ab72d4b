use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::*;

pub const HIGHSCORE_FILE: &str = "highscore.dat";

/// A new best is written through once it beats the saved value by this much.
const SAVE_STEP: f32 = 1.0;

/// The best distance so far, stored as one little-endian `f32`.
///
/// New bests are written as they are reached, at most once per `SAVE_STEP`
/// of distance, and the final best is written when the value is dropped.
/// File errors are logged and never stop the game.
#[derive(Debug)]
pub struct HighScore {
    path: PathBuf,
    best: f32,
    saved: f32,
}

impl HighScore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let best = match read(&path) {
            Ok(best) => {
                info!("High score: {:.2}.", best);
                best
            }
            Err(e) => {
                warn!("{:#}; starting from 0.", e);
                if let Err(e) = write(&path, 0.0) {
                    warn!("{:#}", e);
                }
                0.0
            }
        };

        Self {
            path,
            best,
            saved: best,
        }
    }

    pub fn best(&self) -> f32 {
        self.best
    }

    /// Returns true when `score` beats the stored best.
    pub fn record(&mut self, score: f32) -> bool {
        if score <= self.best {
            return false;
        }
        self.best = score;
        if self.best >= self.saved + SAVE_STEP {
            self.save();
        }
        true
    }

    fn save(&mut self) {
        match write(&self.path, self.best) {
            Ok(()) => {
                debug!("Saved high score {:.2}.", self.best);
                self.saved = self.best;
            }
            Err(e) => warn!("{:#}", e),
        }
    }
}

impl Drop for HighScore {
    fn drop(&mut self) {
        if self.best > self.saved {
            self.save();
        }
        info!("High score on exit: {:.2}.", self.best);
    }
}

fn read(path: &Path) -> Result<f32> {
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read high score file {}", path.display()))?;
    let bytes: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| anyhow!("High score file {} is too short", path.display()))?;
    Ok(f32::from_le_bytes(bytes))
}

fn write(path: &Path, score: f32) -> Result<()> {
    fs::write(path, score.to_le_bytes())
        .with_context(|| format!("Failed to write high score file {}", path.display()))
}
