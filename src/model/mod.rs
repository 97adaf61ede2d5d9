pub mod model_metadata;
pub mod model_storage;

pub use model_metadata::ModelMetadata;
pub use model_storage::{
    checkpoint_path, load_checkpoint, load_checkpoint_metadata, print_metadata_info,
    save_checkpoint,
};
