//! # Service Models
//!
//! Data types shared by the engine, the queue, the processors and the
//! persistence layer.

pub mod page;
pub mod service_data;
pub mod service_meta_data;

pub use page::{PageRequest, PageResult};
pub use service_data::{ProcessingLocation, ServiceData, ServiceId};
pub use service_meta_data::{ServiceArgDescriptor, ServiceMetaData};
