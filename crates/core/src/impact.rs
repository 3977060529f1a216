//! Impact results returned by the remote scorer, and their aggregation.

use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Itemized environmental impact of one or more inference calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactMetrics {
    #[serde(default)]
    pub usage_energy_wh: f64,
    #[serde(default)]
    pub usage_emissions_gco2e: f64,
    #[serde(default)]
    pub usage_water_ml: f64,
    #[serde(default)]
    pub embodied_emissions_gco2e: f64,
    #[serde(default)]
    pub embodied_water_ml: f64,
}

impl ImpactMetrics {
    /// Usage plus embodied emissions.
    pub fn total_emissions_gco2e(&self) -> f64 {
        self.usage_emissions_gco2e + self.embodied_emissions_gco2e
    }

    /// Usage plus embodied water.
    pub fn total_water_ml(&self) -> f64 {
        self.usage_water_ml + self.embodied_water_ml
    }
}

impl Add for ImpactMetrics {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl AddAssign for ImpactMetrics {
    fn add_assign(&mut self, rhs: Self) {
        self.usage_energy_wh += rhs.usage_energy_wh;
        self.usage_emissions_gco2e += rhs.usage_emissions_gco2e;
        self.usage_water_ml += rhs.usage_water_ml;
        self.embodied_emissions_gco2e += rhs.embodied_emissions_gco2e;
        self.embodied_water_ml += rhs.embodied_water_ml;
    }
}

impl Sum for ImpactMetrics {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a ImpactMetrics> for ImpactMetrics {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// An application-level error the scorer attached to a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub code: String,
    pub message: String,
}

/// The scored outcome for one usage record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_impact: Option<ImpactMetrics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_impact: Option<ImpactMetrics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fine_tuning_impact: Option<ImpactMetrics>,

    #[serde(default)]
    pub total_impact: ImpactMetrics,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RowError>,
}

impl ImpactResult {
    /// A successful row whose total equals its inference impact.
    pub fn from_inference(metrics: ImpactMetrics) -> Self {
        Self {
            inference_impact: Some(metrics),
            total_impact: metrics,
            ..Self::default()
        }
    }

    /// A zero-valued row carrying an error, used when the scoring call
    /// itself failed so that waiters still wake up.
    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: Some(RowError {
                code: code.into(),
                message: message.into(),
            }),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Summed impact across many rows (a trace subtree or a batch response).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateImpact {
    pub rows: Vec<ImpactResult>,
    pub total_impact: ImpactMetrics,
    pub total_energy_wh: f64,
    pub total_gco2e: f64,
    pub total_mlh2o: f64,
    pub has_errors: bool,
}

impl AggregateImpact {
    /// Sum the given rows. An empty input yields an all-zero aggregate.
    pub fn from_rows(rows: Vec<ImpactResult>) -> Self {
        let total_impact: ImpactMetrics = rows.iter().map(|r| &r.total_impact).sum();
        let has_errors = rows.iter().any(ImpactResult::is_error);
        Self {
            total_energy_wh: total_impact.usage_energy_wh,
            total_gco2e: total_impact.total_emissions_gco2e(),
            total_mlh2o: total_impact.total_water_ml(),
            total_impact,
            has_errors,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
