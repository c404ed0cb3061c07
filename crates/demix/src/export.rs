//! Stem file output
//!
//! One stereo WAV per stem, named `{base_name}_({Stem}).wav`, written to the
//! configured output directory.

use std::path::{Path, PathBuf};

use demix_core::{Result, SeparatedStems, SeparationError, StemAudio};
use hound::{WavSpec, WavWriter};

use crate::config::SampleFormat;

/// Writes separated stems as WAV files
#[derive(Debug, Clone)]
pub struct WavStemWriter {
    dir: PathBuf,
    format: SampleFormat,
}

impl WavStemWriter {
    pub fn new(dir: impl Into<PathBuf>, format: SampleFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the output directory and check it accepts files
    ///
    /// Called before inference so a bad output location fails fast.
    pub fn prepare(&self) -> Result<()> {
        let dir_err = |source| SeparationError::OutputDirectory {
            path: self.dir.clone(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(dir_err)?;

        let check_file = self.dir.join(".demix-write-check");
        std::fs::write(&check_file, b"").map_err(dir_err)?;
        std::fs::remove_file(&check_file).map_err(dir_err)?;

        log::debug!("Output directory ready: {:?}", self.dir);
        Ok(())
    }

    /// Path a stem of `base_name` is written to
    pub fn stem_path(&self, base_name: &str, stem: &StemAudio) -> PathBuf {
        self.dir.join(format!("{}_({}).wav", base_name, stem.kind.name()))
    }

    /// Write every stem, returning the created paths in stem order
    pub fn write(&self, stems: &SeparatedStems, base_name: &str) -> Result<Vec<PathBuf>> {
        let spec = WavSpec {
            channels: 2,
            sample_rate: stems.sample_rate,
            bits_per_sample: match self.format {
                SampleFormat::Float32 => 32,
                SampleFormat::Int16 => 16,
            },
            sample_format: match self.format {
                SampleFormat::Float32 => hound::SampleFormat::Float,
                SampleFormat::Int16 => hound::SampleFormat::Int,
            },
        };

        let paths = stems
            .stems
            .iter()
            .map(|stem| {
                let path = self.stem_path(base_name, stem);
                self.write_stem(&path, spec, stem)
                    .map_err(|e| SeparationError::StemWriteError {
                        path: path.clone(),
                        source: std::io::Error::other(e),
                    })?;
                log::info!("Wrote {} stem: {:?}", stem.kind.label(), path);
                Ok(path)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(paths)
    }

    fn write_stem(&self, path: &Path, spec: WavSpec, stem: &StemAudio) -> hound::Result<()> {
        let mut writer = WavWriter::create(path, spec)?;
        match self.format {
            SampleFormat::Float32 => {
                for sample in stem.interleaved() {
                    writer.write_sample(sample)?;
                }
            }
            SampleFormat::Int16 => {
                for sample in stem.interleaved() {
                    writer.write_sample(to_i16(sample))?;
                }
            }
        }
        writer.finalize()
    }
}

#[inline]
fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}
