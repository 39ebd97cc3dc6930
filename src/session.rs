//! Who is logged in, persisted in ~/.config/gator/session.toml.
//!
//! The session is loaded once at startup and handed to command handlers by
//! reference; commands that change it (register, login, logout, reset) call
//! [`Session::save`] themselves.
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to access session file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt session file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize session: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Name of the logged-in user, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_user: Option<String>,
}

impl Session {
    /// Read the session file. A missing file means nobody is logged in.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the session file atomically (write temp file, fsync, rename).
    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let content = toml::to_string(self)?;

        // SEC-009: unpredictable temp name, created exclusively
        let suffix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp_path = path.with_extension(format!("tmp.{suffix:016x}"));

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let result = options.open(&temp_path).and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            drop(file);
            std::fs::rename(&temp_path, path)
        });

        if let Err(e) = result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }

        tracing::debug!(path = %path.display(), user = ?self.current_user, "Session saved");
        Ok(())
    }

    pub fn login(&mut self, name: &str) {
        self.current_user = Some(name.to_string());
    }

    pub fn logout(&mut self) {
        self.current_user = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("gator_session_{name}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_file_is_logged_out() {
        let session = Session::load(Path::new("/tmp/gator_no_such_session.toml")).unwrap();
        assert_eq!(session.current_user, None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = scratch_dir("roundtrip");
        let path = dir.join("session.toml");

        let mut session = Session::default();
        session.login("kahya");
        session.save(&path).unwrap();
        assert_eq!(Session::load(&path).unwrap().current_user.as_deref(), Some("kahya"));

        session.logout();
        session.save(&path).unwrap();
        assert_eq!(Session::load(&path).unwrap(), Session::default());

        // No temp files left behind
        let leftovers = std::fs::read_dir(&dir).unwrap().count();
        assert_eq!(leftovers, 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_session_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = scratch_dir("perms");
        let path = dir.join("session.toml");

        let mut session = Session::default();
        session.login("holgith");
        session.save(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = scratch_dir("corrupt");
        let path = dir.join("session.toml");
        std::fs::write(&path, "current_user = [").unwrap();

        assert!(matches!(Session::load(&path), Err(SessionError::Parse(_))));

        std::fs::remove_dir_all(&dir).ok();
    }
}
