//! CCBHC Measures - Denominator/numerator computation engine
//!
//! Each measure walks its sub-measures through the same fixed protocol:
//! build the eligible population, remove exclusions, constrain the
//! performance window, mark performance, stratify, and project the final
//! report tables. The per-measure modules hold the hard-coded clinical
//! rules; this crate's shared pieces enforce the protocol and resolve
//! stratification.

pub mod asc;
pub mod cdf_ad;
pub mod cdf_ch;
pub mod context;
pub mod dep_rem;
pub mod error;
pub mod i_serv;
pub mod measure;
pub mod sdoh;
pub mod stratify;
pub mod submeasure;

pub use asc::Asc;
pub use cdf_ad::CdfAd;
pub use cdf_ch::CdfCh;
pub use context::PipelineContext;
pub use dep_rem::DepRem;
pub use error::{MeasureError, Result};
pub use i_serv::IServ;
pub use measure::{Measure, MeasureDataset};
pub use sdoh::Sdoh;
pub use submeasure::{collect_measurement_data, Stage, Submeasure, SubmeasureOutput};
