//! Data models for the report pipeline

pub mod category;
pub mod municipality;
pub mod observation;
pub mod pipeline_run;

pub use category::{Category, Preset, PresetWeights};
pub use municipality::{MunicipalityCode, MunicipalityIdentity};
pub use observation::{ChoiceScore, CityScoreResult, DataAvailability, RankingEntry, RawObservation};
pub use pipeline_run::{
    BarChartInput, CategoryOptions, ChartInputs, FetchFailure, FetchSource, GaugeInput,
    PipelineRequest, PipelineResult, PipelineRun, RenderedChart, RenderedCharts, StateTransition,
};
pub use machi_common::events::PipelineState;
