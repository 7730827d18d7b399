//! Frozen graph serialization.

use std::{fs, io, io::Write, path::Path};

use anyhow::{Context, Result};
use log::info;
use tempfile::{Builder, NamedTempFile};

use crate::graph::Graph;
use crate::proto::encode_graph;
use mtcnn_utils::{existing_parent_dir, timing_guard};

/// Write `graph` as a binary `GraphDef` to `path`, returning the number of bytes written.
///
/// The bytes go to a temporary file next to the destination which is then
/// renamed over it, so a failed write never leaves a truncated model behind.
/// The result gets the permissions of the file it replaces, or those of a
/// freshly created file when there was none.
pub fn write_graph_def<P: AsRef<Path>>(graph: &Graph, path: P) -> Result<usize> {
    let path = path.as_ref();
    let _guard = timing_guard("mtcnn_core::write_graph_def", log::Level::Debug);
    let dir = existing_parent_dir(path)?;
    let bytes = encode_graph(graph);

    info!("Saving model to {}", path.display());
    let mut staged = staging_file(&dir, path)
        .with_context(|| format!("failed to create a temporary file in {}", dir.display()))?;
    staged
        .write_all(&bytes)
        .and_then(|_| staged.as_file().sync_all())
        .with_context(|| format!("failed to write graph bytes for {}", path.display()))?;
    staged
        .persist(path)
        .with_context(|| format!("failed to save model to {}", path.display()))?;
    Ok(bytes.len())
}

fn staging_file(dir: &Path, path: &Path) -> io::Result<NamedTempFile> {
    let mut builder = Builder::new();
    builder.prefix(".mtcnn-");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // open(2) masks this with the umask, like File::create
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    let staged = builder.tempfile_in(dir)?;
    if let Ok(existing) = fs::metadata(path) {
        staged.as_file().set_permissions(existing.permissions())?;
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use crate::proto::decode_graph;
    use std::fs;
    use tempfile::tempdir;

    fn tiny_graph() -> Graph {
        let mut graph = Graph::new();
        graph.add_node(Node::new("input", "Placeholder")).unwrap();
        graph
            .add_node(Node::new("out", "Relu").with_input("input"))
            .unwrap();
        graph
    }

    #[test]
    fn writes_decodable_bytes() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("model.pb");
        let written = write_graph_def(&tiny_graph(), &path).expect("write");

        let bytes = fs::read(&path).expect("read back");
        assert_eq!(bytes.len(), written);
        assert_eq!(decode_graph(&bytes).unwrap(), tiny_graph());
    }

    #[test]
    fn overwrites_and_leaves_no_stray_files() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("model.pb");
        fs::write(&path, b"stale").unwrap();
        write_graph_def(&tiny_graph(), &path).expect("write");

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_ne!(fs::read(&path).unwrap(), b"stale");
    }

    #[cfg(unix)]
    #[test]
    fn new_model_gets_the_same_mode_as_a_plain_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("model.pb");
        write_graph_def(&tiny_graph(), &path).expect("write");
        let plain = dir.path().join("plain.bin");
        fs::write(&plain, b"x").unwrap();

        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&path), mode(&plain));
        assert_ne!(mode(&path), 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn overwrite_keeps_the_existing_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("model.pb");
        fs::write(&path, b"stale").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        write_graph_def(&tiny_graph(), &path).expect("write");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn missing_directory_fails_without_output() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("absent").join("model.pb");
        let err = write_graph_def(&tiny_graph(), &path).unwrap_err();
        assert!(format!("{err}").contains("destination directory does not exist"));
        assert!(!path.exists());
    }
}
