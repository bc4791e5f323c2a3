//! Model catalog for the llamaslot runtime
//!
//! - [`ModelCatalog`]: lookup of imported models by id
//! - [`SqliteModelCatalog`]: the on-disk `model_data` table
//! - [`QuantizationPolicy`]: formats refused at bind time

pub mod catalog;
pub mod quantization;
pub mod sqlite;

pub use catalog::{InMemoryModelCatalog, ModelCatalog, ModelCatalogError};
pub use quantization::{
    file_type_name, quantization_label, QuantizationPolicy, DEFAULT_DEPRECATED_QUANTIZATIONS,
};
pub use sqlite::SqliteModelCatalog;
