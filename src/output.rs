//! Destinations for rendered objects.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use log::info;

/// Receives the rendered text of every object read.
pub trait ObjectSink {
    fn write_object(&mut self, name: &str, text: &str) -> io::Result<()>;
}

/// Writes `<root>/<meter id>/<object name>.xml`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl AsRef<Path>, meter_id: &str) -> Self {
        Self { dir: root.as_ref().join(meter_id) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ObjectSink for DirectorySink {
    fn write_object(&mut self, name: &str, text: &str) -> io::Result<()> {
        if !is_file_name(name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("object name {:?} is not a file name", name),
            ));
        }
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.xml", name));
        fs::write(&path, text)?;
        info!("Wrote {}", path.display());
        Ok(())
    }
}

/// A single plain path component, so the file stays inside the meter directory.
fn is_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Keeps rendered objects in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub objects: Vec<(String, String)>,
}

impl ObjectSink for MemorySink {
    fn write_object(&mut self, name: &str, text: &str) -> io::Result<()> {
        self.objects.push((name.to_string(), text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_directory_sink_layout() {
        let root = tempdir().unwrap();
        let mut sink = DirectorySink::new(root.path(), "12345");

        sink.write_object("energy", "<Root />").unwrap();
        sink.write_object("energy", "<Root>\n</Root>\n").unwrap();

        let path = root.path().join("12345").join("energy.xml");
        assert_eq!(fs::read_to_string(path).unwrap(), "<Root>\n</Root>\n");
        assert_eq!(sink.dir(), root.path().join("12345"));
    }

    #[test]
    fn test_directory_sink_rejects_paths() {
        let root = tempdir().unwrap();
        let mut sink = DirectorySink::new(root.path(), "12345");

        for name in ["../escaped", "a/b", "..", "", "/abs", "a\\b"] {
            let err = sink.write_object(name, "<Root />").unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{}", name);
        }
        assert!(!root.path().join("escaped.xml").exists());
        assert!(!root.path().join("12345").exists());
    }

    #[test]
    fn test_memory_sink() {
        let mut sink = MemorySink::default();
        sink.write_object("a", "x").unwrap();
        assert_eq!(sink.objects, vec![("a".to_string(), "x".to_string())]);
    }
}
