//! Persistence for models.
//!
//! Two formats are supported. [`save_program`] exports the traced program,
//! which restores without any layer code. [`save_model`] writes layer configs
//! plus a weight archive and needs a [`crate::layers::LayerRegistry`] to load.
//! Typed causes are available through `downcast_ref::<GraphError>()`.

mod archive;
mod model;
mod program;

pub use archive::{WeightArchive, WeightArchiveReader, WeightEntry};
pub use model::{load_model, save_model, MODEL_FILE, WEIGHTS_FILE};
pub use program::{load_program, save_program, LoadedProgram, PROGRAM_TEXT_FILE, SIGNATURE_FILE};
