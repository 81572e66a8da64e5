use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::audio::{self, WaveformBuffer};
use crate::export;
use crate::render::RenderedLoop;
use crate::session::SampleSource;
use crate::{LoopError, SampleId};

const INPUT_EXTENSIONS: &[&str] = &["wav", "flac", "ogg", "mp3"];

/// The `sound/input`, `sound/output` and `logs` folders below a data directory.
#[derive(Clone, Debug)]
pub struct SoundFolders {
    input_dir: PathBuf,
    output_dir: PathBuf,
    log_dir: PathBuf,
}

/// Where the log lives below a data directory.
pub fn log_dir<P: AsRef<Path>>(data_dir: P) -> PathBuf {
    data_dir.as_ref().join("logs")
}

impl SoundFolders {
    /// Creates the folders if they are missing.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let sound = data_dir.as_ref().join("sound");
        let folders = Self {
            input_dir: sound.join("input"),
            output_dir: sound.join("output"),
            log_dir: log_dir(&data_dir),
        };
        for dir in [&folders.input_dir, &folders.output_dir, &folders.log_dir] {
            if !dir.is_dir() {
                fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
                log::info!("created {}", dir.display());
            }
        }
        Ok(folders)
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn list_inputs(&self) -> Result<Vec<SampleId>> {
        list_files(&self.input_dir, |ext| INPUT_EXTENSIONS.contains(&ext))
    }

    pub fn list_outputs(&self) -> Result<Vec<String>> {
        let files = list_files(&self.output_dir, |ext| ext == "wav")?;
        Ok(files.into_iter().map(|id| id.as_str().to_owned()).collect())
    }

    /// Copies an audio file from anywhere into the input folder.
    pub fn import(&self, path: &Path) -> Result<SampleId> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("{} has no usable file name", path.display()))?;
        let target = self.input_dir.join(name);
        fs::copy(path, &target).with_context(|| format!("Failed to copy {} into the input folder", path.display()))?;
        log::info!("imported {}", target.display());
        Ok(SampleId::new(name))
    }

    /// Writes the loop into the output folder and returns where it landed.
    pub fn save(&self, rendered: RenderedLoop) -> Result<PathBuf, LoopError> {
        let path = self.output_dir.join(export::output_file_name(rendered.provenance()));
        export::write_wav(&path, rendered).map_err(|e| LoopError::OutputFailure(format!("{e:#}")))?;
        log::info!("saved {}", path.display());
        Ok(path)
    }

    pub fn delete_output(&self, name: &str) -> Result<()> {
        if name.is_empty() || Path::new(name).file_name() != Some(OsStr::new(name)) {
            bail!("{name:?} is not a file name in the output folder");
        }
        let path = self.output_dir.join(name);
        fs::remove_file(&path).with_context(|| format!("Failed to delete {}", path.display()))?;
        log::info!("deleted {}", path.display());
        Ok(())
    }
}

fn list_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<SampleId>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| keep(&e.to_ascii_lowercase()));
        if let (true, Some(name)) = (matches, path.file_name().and_then(|n| n.to_str())) {
            names.push(SampleId::new(name));
        }
    }
    names.sort();
    Ok(names)
}

impl SampleSource for SoundFolders {
    fn list(&self) -> Result<Vec<SampleId>, LoopError> {
        self.list_inputs()
            .map_err(|e| LoopError::SourceUnavailable(format!("{e:#}")))
    }

    fn load(&self, sample: &SampleId) -> Result<WaveformBuffer, LoopError> {
        let path = self.input_dir.join(sample.as_str());
        if !path.is_file() {
            return Err(LoopError::UnknownSample(sample.to_string()));
        }
        audio::load_audio_file(&path).map_err(|e| LoopError::DecodeFailure(format!("{e:#}")))
    }
}
