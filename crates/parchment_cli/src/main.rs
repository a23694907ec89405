//! Debug CLI for inspecting parchment note-store log files (§6.1).
//!
//! Not a product surface — a test/debugging aid for decoding a single
//! packed file or replaying one note's full history, matching spec.md §6's
//! "standalone debug command... useful for tests" framing.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use parchment_core::bootstrap::project_view;
use parchment_core::codec::PackedFile;
use parchment_core::crdt::DocumentRegistry;
use parchment_core::flush::Immediate;
use parchment_core::fs::RealFileSystem;
use parchment_core::store::UpdateStore;

#[derive(Parser)]
#[command(
    name = "parchment",
    about = "Debug tool for parchment note-store log files"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a single packed `.yjson` file and print its metadata.
    DumpPacked {
        /// Path to the packed file.
        path: PathBuf,
    },
    /// Replay a note's full update history and print its projected view.
    DumpNote {
        /// Root directory containing one child directory per note.
        notes_root: PathBuf,
        /// Note id to replay.
        note_id: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::DumpPacked { path } => dump_packed(&path).await,
        Commands::DumpNote {
            notes_root,
            note_id,
        } => dump_note(&notes_root, &note_id).await,
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn dump_packed(path: &std::path::Path) -> parchment_core::Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(parchment_core::StoreError::Io)?;
    let packed = PackedFile::from_bytes(path, &bytes)?;
    let decoded = packed.decode_updates()?;
    let total_bytes: usize = decoded.iter().map(|(_, update)| update.len()).sum();

    println!("instance:   {}", packed.instance);
    println!("sequence:   [{}, {}]", packed.sequence.0, packed.sequence.1);
    println!("timestamp:  {}", packed.timestamp);
    println!("updates:    {}", packed.updates.len());
    println!("total bytes decoded: {total_bytes}");
    Ok(())
}

async fn dump_note(notes_root: &std::path::Path, note_id: &str) -> parchment_core::Result<()> {
    let fs = Arc::new(RealFileSystem);
    let store = UpdateStore::new(
        Arc::clone(&fs),
        notes_root.to_path_buf(),
        "parchment-cli".to_string(),
        Arc::new(Immediate),
    );
    let registry = DocumentRegistry::new();

    store.initialize(note_id).await?;
    let document = registry.get_document(note_id);
    let mut applied = 0usize;
    for entry in store.read_all_updates(note_id).await? {
        if document
            .apply_update(&entry.update, parchment_core::crdt::UpdateOrigin::Silent)
            .is_ok()
        {
            applied += 1;
        }
    }

    let view = project_view(note_id, &document);
    println!("id:         {}", view.id);
    println!("title:      {}", view.title);
    println!("content:    {} chars", document.content_text().len());
    println!("tags:       {:?}", view.tags);
    println!("folder:     {:?}", view.folder_id);
    println!("created:    {}", view.created);
    println!("modified:   {}", view.modified);
    println!("deleted:    {}", view.deleted);
    println!("applied:    {applied} updates");
    Ok(())
}
