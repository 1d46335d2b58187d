//! Domain model (identities, the observed record, features, config).

pub mod config;
pub mod feature;
pub mod ids;
pub mod record;

pub use config::StoreConfig;
pub use feature::{Feature, FeatureSet};
pub use ids::{BlocId, ObserverId};
pub use record::{ObservedValue, Record, into_record};
