//! Pricing Domain
//!
//! In-memory cloud instance price catalog, kept fresh by per-provider
//! refresh loops and served over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐      ┌──────────────┐
//! │  Handlers   │      │ MirrorClient │  ← downstream read-through copy
//! └──────┬──────┘      └──────────────┘
//!        │
//! ┌──────▼──────┐ miss ┌──────────────┐
//! │ PriceClient ├─────►│ TriggerQueue │
//! └──────┬──────┘      └──────┬───────┘
//!        │                    │
//! ┌──────▼──────┐      ┌──────▼──────────┐
//! │ PriceStore  │◄─────┤ RefreshScheduler│ ← PriceRefresher (provider adapters)
//! └─────────────┘      └─────────────────┘
//! ```

pub mod client;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod mirror;
pub mod models;
pub mod scheduler;
pub mod store;
pub mod trigger;

// Re-export commonly used types
pub use client::PriceClient;
pub use error::{PricingError, PricingResult};
pub use executor::{map_bounded, run_bounded};
pub use handlers::{ApiDoc, PriceApiState};
pub use mirror::{MirrorClient, MirrorConfig, MirrorRefreshLoop};
pub use models::{
    commitment_key, Arch, CloudProvider, CommitmentRate, InstanceSpec, InstanceTypePrice,
    PaymentOption, PriceCatalog, PriceUpdate, RegionTypeKey, RegionalInstancePrice,
};
pub use scheduler::{PriceRefresher, RefreshScheduler, SchedulerConfig};
pub use store::{CatalogStats, PriceStore};
pub use trigger::{trigger_queue, TriggerQueue, TriggerReceiver, DEFAULT_TRIGGER_CAPACITY};
