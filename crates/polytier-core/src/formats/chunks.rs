//! # Chunked Checkpoint Store
//!
//! A checkpoint file is a 5-byte header followed by frames:
//!
//! ```text
//! "PTCK" version(u8)
//! [len: u32 LE][postcard Frame] ...
//! ```
//!
//! Frames appear in the order `Meta`, `Chunk`*, `Modules`, `Summary`. Each
//! chunk holds at most `chunk_size` polygons; every `snapshot_interval`-th
//! chunk also embeds the registry state captured at flush time.
//!
//! Reading is forgiving: an undecodable frame is skipped and a truncated
//! tail ends the read, both with a recorded warning.

use crate::encoder;
use crate::error::{Error, Result};
use crate::registry::RegistryState;
use crate::workspace::{ModuleRef, Token, Workspace};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File magic.
pub const MAGIC: &[u8; 4] = b"PTCK";

/// Current format version.
pub const FORMAT_VERSION: u8 = 1;

/// Extension used for checkpoint files.
pub const CHECKPOINT_EXTENSION: &str = "ptck";

const HEADER_LEN: usize = MAGIC.len() + 1;
const LEN_PREFIX: usize = 4;

/// Number of chunks needed for `polygons` polygons.
#[must_use]
pub fn chunk_count(polygons: usize, chunk_size: usize) -> usize {
    if polygons == 0 {
        0
    } else {
        polygons.div_ceil(chunk_size.max(1))
    }
}

// =============================================================================
// FRAMES
// =============================================================================

/// One framed record inside a checkpoint file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Meta {
        label: String,
        chunk_size: u32,
        snapshot_interval: u32,
    },
    Chunk {
        index: u32,
        count: u32,
        payload: String,
        registry_state: Option<RegistryState>,
    },
    Modules {
        refs: Vec<ModuleRef>,
    },
    Summary {
        total_polygons: u64,
        chunks: u32,
    },
}

fn push_frame(buf: &mut Vec<u8>, frame: &Frame) -> Result<()> {
    let bytes = postcard::to_stdvec(frame)?;
    let len = u32::try_from(bytes.len()).map_err(|_| Error::CorruptChunkStore {
        path: String::new(),
        reason: format!("frame of {} bytes exceeds u32 length prefix", bytes.len()),
    })?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&bytes);
    Ok(())
}

// =============================================================================
// WRITE
// =============================================================================

/// Location and shape of a written checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenCheckpoint {
    pub path: PathBuf,
    pub chunk_count: usize,
    pub polygons: usize,
}

/// Directory of checkpoint files with a fixed chunking policy.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
    chunk_size: usize,
    snapshot_interval: usize,
}

impl ChunkStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, chunk_size: usize, snapshot_interval: usize) -> Self {
        Self {
            root: root.into(),
            chunk_size: chunk_size.max(1),
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Path a checkpoint with `label` is written to.
    #[must_use]
    pub fn path_for(&self, label: &str) -> PathBuf {
        self.root.join(format!("{label}.{CHECKPOINT_EXTENSION}"))
    }

    /// Serialize the workspace into chunks and write it durably.
    ///
    /// The file is written next to its final path and renamed into place
    /// once synced, so a crash never leaves a half-written checkpoint.
    pub fn write(
        &self,
        label: &str,
        workspace: &Workspace,
        registry_state: &RegistryState,
    ) -> Result<WrittenCheckpoint> {
        fs::create_dir_all(&self.root)?;

        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.extend_from_slice(MAGIC);
        buf.push(FORMAT_VERSION);

        push_frame(
            &mut buf,
            &Frame::Meta {
                label: label.to_string(),
                chunk_size: u32::try_from(self.chunk_size).unwrap_or(u32::MAX),
                snapshot_interval: u32::try_from(self.snapshot_interval).unwrap_or(u32::MAX),
            },
        )?;

        let polygons = workspace.polygons();
        let mut chunks = 0u32;
        for (index, slice) in polygons.chunks(self.chunk_size).enumerate() {
            let embed = index % self.snapshot_interval == 0;
            push_frame(
                &mut buf,
                &Frame::Chunk {
                    index: index as u32,
                    count: slice.len() as u32,
                    payload: encoder::encode_polygons(slice),
                    registry_state: embed.then(|| registry_state.clone()),
                },
            )?;
            chunks += 1;
        }

        push_frame(
            &mut buf,
            &Frame::Modules {
                refs: workspace.module_references().iter().copied().collect(),
            },
        )?;
        push_frame(
            &mut buf,
            &Frame::Summary {
                total_polygons: polygons.len() as u64,
                chunks,
            },
        )?;

        let path = self.path_for(label);
        let tmp = path.with_extension(format!("{CHECKPOINT_EXTENSION}.tmp"));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        Ok(WrittenCheckpoint {
            path,
            chunk_count: chunks as usize,
            polygons: polygons.len(),
        })
    }
}

// =============================================================================
// READ
// =============================================================================

/// Everything recovered from one checkpoint file.
#[derive(Debug, Clone, Default)]
pub struct LoadedCheckpoint {
    pub label: Option<String>,
    pub chunk_size: Option<u32>,
    /// `(index, tokens)` in index order.
    pub chunks: Vec<(u32, Vec<Token>)>,
    pub module_refs: Vec<ModuleRef>,
    /// Most recent registry state embedded in a chunk.
    pub registry_state: Option<RegistryState>,
    pub expected_polygons: Option<u64>,
    pub warnings: Vec<String>,
}

impl LoadedCheckpoint {
    /// Replace `workspace` with the recovered content.
    pub fn replay_into(&self, workspace: &mut Workspace) -> Result<usize> {
        workspace.clear();
        for (index, tokens) in &self.chunks {
            workspace.ingest_tokens(*index, tokens.iter().copied())?;
        }
        for module in &self.module_refs {
            workspace.ingest_tokens(module.chunk_index, [Token::Module(module.module_id)])?;
        }
        Ok(workspace.polygon_count())
    }

    #[must_use]
    pub fn polygon_count(&self) -> usize {
        self.chunks
            .iter()
            .map(|(_, tokens)| {
                tokens
                    .iter()
                    .filter(|t| matches!(t, Token::Polygon(_)))
                    .count()
            })
            .sum()
    }
}

fn note(warnings: &mut Vec<String>, path: &Path, message: String) {
    warn!(path = %path.display(), "{message}");
    warnings.push(message);
}

/// Read a checkpoint file.
pub fn read_checkpoint(path: &Path) -> Result<LoadedCheckpoint> {
    let data = fs::read(path)?;
    if data.len() < HEADER_LEN || &data[..MAGIC.len()] != MAGIC {
        return Err(Error::CorruptChunkStore {
            path: path.display().to_string(),
            reason: "missing PTCK header".to_string(),
        });
    }
    if data[MAGIC.len()] != FORMAT_VERSION {
        return Err(Error::CorruptChunkStore {
            path: path.display().to_string(),
            reason: format!("unsupported format version {}", data[MAGIC.len()]),
        });
    }

    let mut loaded = LoadedCheckpoint::default();
    let mut pos = HEADER_LEN;
    let mut frame_no = 0usize;

    while pos < data.len() {
        let Some(prefix) = data.get(pos..pos + LEN_PREFIX) else {
            note(
                &mut loaded.warnings,
                path,
                format!("truncated length prefix at byte {pos}"),
            );
            break;
        };
        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(prefix);
        let len = u32::from_le_bytes(len_bytes) as usize;
        let start = pos + LEN_PREFIX;
        let Some(body) = data.get(start..start.saturating_add(len)) else {
            note(
                &mut loaded.warnings,
                path,
                format!("frame {frame_no} truncated: wanted {len} bytes at byte {start}"),
            );
            break;
        };
        pos = start + len;
        frame_no += 1;

        let frame: Frame = match postcard::from_bytes(body) {
            Ok(frame) => frame,
            Err(err) => {
                note(
                    &mut loaded.warnings,
                    path,
                    format!("skipping corrupt frame {}: {err}", frame_no - 1),
                );
                continue;
            }
        };

        match frame {
            Frame::Meta {
                label, chunk_size, ..
            } => {
                loaded.label = Some(label);
                loaded.chunk_size = Some(chunk_size);
            }
            Frame::Chunk {
                index,
                count,
                payload,
                registry_state,
            } => match encoder::decode(&payload) {
                Ok(tokens) => {
                    let decoded = tokens
                        .iter()
                        .filter(|t| matches!(t, Token::Polygon(_)))
                        .count();
                    if decoded != count as usize {
                        note(
                            &mut loaded.warnings,
                            path,
                            format!("chunk {index} declares {count} polygons, decoded {decoded}"),
                        );
                    }
                    if registry_state.is_some() {
                        loaded.registry_state = registry_state;
                    }
                    loaded.chunks.push((index, tokens));
                }
                Err(err) => note(
                    &mut loaded.warnings,
                    path,
                    format!("skipping chunk {index}: {err}"),
                ),
            },
            Frame::Modules { refs } => loaded.module_refs.extend(refs),
            Frame::Summary { total_polygons, .. } => {
                loaded.expected_polygons = Some(total_polygons);
            }
        }
    }

    loaded.chunks.sort_by_key(|(index, _)| *index);
    if let Some(expected) = loaded.expected_polygons {
        let found = loaded.polygon_count() as u64;
        if found != expected {
            note(
                &mut loaded.warnings,
                path,
                format!("summary expects {expected} polygons, recovered {found}"),
            );
        }
    }
    Ok(loaded)
}

// =============================================================================
// TESTS
// =============================================================================
