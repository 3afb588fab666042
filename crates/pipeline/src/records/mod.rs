pub mod model;
pub mod repository;

pub use model::CostRecord;
pub use repository::CostRecordRepository;
