//! Saving the DESCRIBE body and reading the control attribute back out of it.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::error::{Error, ErrorInt};
use crate::wrap;

/// Used when the URL has no trailing path segment to name the file after.
pub const DEFAULT_SDP_FILENAME: &str = "video.sdp";

/// Derives the `.sdp` filename from the last path segment of `url`.
///
/// `rtsp://host/ch1/main` gives `main.sdp`; `rtsp://host` and `rtsp://host/`
/// give [`DEFAULT_SDP_FILENAME`]. Query strings are not stripped.
pub fn filename_for(url: &str) -> String {
    let path = match url.find("://") {
        Some(i) => {
            let rest = &url[i + 3..];
            rest.find('/').map_or("", |j| &rest[j..])
        }
        None => url,
    };
    match path.rsplit_once('/') {
        Some((_, segment)) if !segment.is_empty() => format!("{}.sdp", segment),
        _ => DEFAULT_SDP_FILENAME.to_owned(),
    }
}

/// Matches `a = control: <token>` with optional whitespace around each part.
pub fn parse_control_line(line: &str) -> Option<&str> {
    let rest = line
        .trim_start()
        .strip_prefix('a')?
        .trim_start()
        .strip_prefix('=')?
        .trim_start()
        .strip_prefix("control:")?;
    rest.split_whitespace().next()
}

/// Logs the session name and media sections of a session description.
pub fn summarize(body: &[u8]) {
    match sdp_types::Session::parse(body) {
        Ok(session) => {
            debug!(
                "SDP session '{}' with {} media section(s)",
                session.session_name,
                session.medias.len()
            );
            for media in &session.medias {
                debug!(
                    "  m={} {} {} {}",
                    media.media, media.port, media.proto, media.fmt
                );
            }
        }
        Err(e) => debug!("SDP body did not parse: {:?}", e),
    }
}

/// Where [`SdpStore::save`] ended up writing the body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SavedTo {
    File(PathBuf),
    Stdout,
}

/// Session descriptions kept as files in one directory.
#[derive(Clone, Debug)]
pub struct SdpStore {
    dir: PathBuf,
}

impl SdpStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn current_dir() -> Self {
        Self::new(".")
    }

    pub fn path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Writes `body` to `filename`, truncating it.
    ///
    /// If the file can't be written the body goes to standard output instead;
    /// only a failure there is an error.
    pub fn save(&self, filename: &str, body: &[u8]) -> Result<SavedTo, Error> {
        let path = self.path(filename);
        match File::create(&path) {
            Ok(mut file) => {
                info!("Writing SDP to '{}'", path.display());
                match file.write_all(body).and_then(|_| file.flush()) {
                    Ok(()) => return Ok(SavedTo::File(path)),
                    Err(e) => error!("Could not write '{}': {}", path.display(), e),
                }
            }
            Err(e) => error!("Could not open '{}' for writing: {}", path.display(), e),
        }

        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        out.write_all(body)
            .and_then(|_| out.flush())
            .map_err(|source| {
                wrap!(ErrorInt::SdpWriteError {
                    filename: filename.to_owned(),
                    source,
                })
            })?;
        Ok(SavedTo::Stdout)
    }

    /// Scans `filename` for `a=control:` lines. The last match wins; a
    /// missing file or no match gives an empty string.
    pub fn extract_control_attribute(&self, filename: &str) -> String {
        let path = self.path(filename);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                debug!("No SDP to scan at '{}': {}", path.display(), e);
                return String::new();
            }
        };

        let mut control = String::new();
        for line in BufReader::new(file).split(b'\n') {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!("Stopped reading '{}': {}", path.display(), e);
                    break;
                }
            };
            if let Some(token) = parse_control_line(&String::from_utf8_lossy(&line)) {
                control = token.to_owned();
            }
        }
        control
    }
}
