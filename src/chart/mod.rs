//! Chart, dimension and variable model
//!
//! Charts live in a dense arena ([`Charts`]) owned by their job. Other code refers to
//! them by id or through [`ChartIndex`] / [`DimRef`] handles, never through long-lived
//! references, so charts can be rebuilt, obsoleted and resurrected without aliasing.

mod state;

use std::collections::HashMap;

pub use state::{ChartState, Step};

use crate::error::{ChartError, validate_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChartType {
    #[default]
    Line,
    Area,
    Stacked,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Line => "line",
            ChartType::Area => "area",
            ChartType::Stacked => "stacked",
        }
    }
}

/// How the consumer turns collected values into displayed values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Absolute,
    Incremental,
    PercentageOfAbsoluteRow,
    PercentageOfIncrementalRow,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Absolute => "absolute",
            Algorithm::Incremental => "incremental",
            Algorithm::PercentageOfAbsoluteRow => "percentage-of-absolute-row",
            Algorithm::PercentageOfIncrementalRow => "percentage-of-incremental-row",
        }
    }
}

/// One numeric series of a chart, keyed by its metric id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dim {
    pub id: String,
    pub name: Option<String>,
    pub algorithm: Algorithm,
    pub multiplier: i64,
    pub divisor: i64,
    pub hidden: bool,
}

impl Dim {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            algorithm: Algorithm::Absolute,
            multiplier: 1,
            divisor: 1,
            hidden: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn multiplier(mut self, multiplier: i64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn divisor(mut self, divisor: i64) -> Self {
        self.divisor = divisor;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A chart-scoped variable, looked up in the snapshot like a dimension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
    pub id: String,
}

impl Var {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone)]
pub struct Chart {
    pub id: String,
    pub title: String,
    pub units: String,
    pub family: String,
    pub context: String,
    pub chart_type: ChartType,

    dims: Vec<Dim>,
    vars: Vec<Var>,

    state: ChartState,
    /// Assigned once, on the first reconciliation
    priority: Option<u64>,
    /// Consecutive reconciliations without a value for any dimension
    misses: u32,
}

impl Chart {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            units: String::new(),
            family: id.clone(),
            context: String::new(),
            chart_type: ChartType::Line,
            id,
            dims: vec![],
            vars: vec![],
            state: ChartState::Initial,
            priority: None,
            misses: 0,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.family = family.into();
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn chart_type(mut self, chart_type: ChartType) -> Self {
        self.chart_type = chart_type;
        self
    }

    pub fn dim(mut self, dim: Dim) -> Self {
        self.dims.push(dim);
        self
    }

    pub fn var(mut self, var: Var) -> Self {
        self.vars.push(var);
        self
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    pub fn state(&self) -> ChartState {
        self.state
    }

    pub fn priority(&self) -> Option<u64> {
        self.priority
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    fn validate(&self) -> Result<(), ChartError> {
        validate_id(&self.id)?;

        for (i, dim) in self.dims.iter().enumerate() {
            validate_id(&dim.id)?;
            if self.dims[..i].iter().any(|other| other.id == dim.id) {
                return Err(ChartError::DuplicateDim {
                    chart: self.id.clone(),
                    dim: dim.id.clone(),
                });
            }
        }

        for var in &self.vars {
            validate_id(&var.id)?;
        }

        Ok(())
    }

    /// The definition changed after it was announced: announce it again
    fn mark_rebuilt(&mut self) {
        if matches!(self.state, ChartState::New | ChartState::Created) {
            self.state = ChartState::Rebuilt;
        }
    }
}

/// Position of a chart inside its [`Charts`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChartIndex(usize);

/// Position of a dimension: owning chart plus index within that chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DimRef {
    pub chart: ChartIndex,
    pub dim: usize,
}

/// Arena of charts owned by a single job
///
/// Charts are never physically removed: removal goes through the state machine and a
/// removed chart keeps its slot.
#[derive(Debug, Clone, Default)]
pub struct Charts {
    charts: Vec<Chart>,
    index: HashMap<String, usize>,
}

impl Charts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_charts(charts: impl IntoIterator<Item = Chart>) -> Result<Self, ChartError> {
        let mut result = Self::new();
        for chart in charts {
            result.add(chart)?;
        }

        Ok(result)
    }

    pub fn add(&mut self, chart: Chart) -> Result<ChartIndex, ChartError> {
        chart.validate()?;

        if self.index.contains_key(&chart.id) {
            return Err(ChartError::DuplicateChart(chart.id));
        }

        let position = self.charts.len();
        self.index.insert(chart.id.clone(), position);
        self.charts.push(chart);

        Ok(ChartIndex(position))
    }

    pub fn position(&self, id: &str) -> Option<ChartIndex> {
        self.index.get(id).copied().map(ChartIndex)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Chart> {
        self.index.get(id).map(|&i| &self.charts[i])
    }

    /// Mutable access for metadata edits; use [`add_dim`](Self::add_dim) and
    /// [`remove_dim`](Self::remove_dim) to change the dimension set
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Chart> {
        self.index.get(id).map(|&i| &mut self.charts[i])
    }

    pub fn chart(&self, index: ChartIndex) -> &Chart {
        &self.charts[index.0]
    }

    pub fn dim(&self, dim: DimRef) -> &Dim {
        &self.charts[dim.chart.0].dims[dim.dim]
    }

    pub fn add_dim(&mut self, chart_id: &str, dim: Dim) -> Result<DimRef, ChartError> {
        validate_id(&dim.id)?;

        let chart_index = self.require(chart_id)?;
        let chart = &mut self.charts[chart_index.0];

        if chart.dims.iter().any(|d| d.id == dim.id) {
            return Err(ChartError::DuplicateDim { chart: chart.id.clone(), dim: dim.id });
        }

        chart.dims.push(dim);
        chart.mark_rebuilt();

        Ok(DimRef { chart: chart_index, dim: chart.dims.len() - 1 })
    }

    pub fn remove_dim(&mut self, chart_id: &str, dim_id: &str) -> Result<(), ChartError> {
        let chart_index = self.require(chart_id)?;
        let chart = &mut self.charts[chart_index.0];

        let Some(position) = chart.dims.iter().position(|d| d.id == dim_id) else {
            return Err(ChartError::UnknownDim { chart: chart.id.clone(), dim: dim_id.to_string() });
        };

        chart.dims.remove(position);
        chart.mark_rebuilt();

        Ok(())
    }

    pub fn add_var(&mut self, chart_id: &str, var: Var) -> Result<(), ChartError> {
        validate_id(&var.id)?;

        let chart_index = self.require(chart_id)?;
        let chart = &mut self.charts[chart_index.0];
        if !chart.vars.iter().any(|v| v.id == var.id) {
            chart.vars.push(var);
        }

        Ok(())
    }

    /// Request removal; the chart is flagged obsolete once and then ignored for good
    pub fn remove(&mut self, chart_id: &str) -> Result<(), ChartError> {
        let chart_index = self.require(chart_id)?;
        let chart = &mut self.charts[chart_index.0];

        if !matches!(chart.state, ChartState::MarkedRemove | ChartState::MarkedDelete) {
            chart.state = ChartState::MarkedRemove;
        }

        Ok(())
    }

    /// Bring an obsolete chart back without waiting for data to reappear
    pub fn recover(&mut self, chart_id: &str) -> Result<(), ChartError> {
        let chart_index = self.require(chart_id)?;
        let chart = &mut self.charts[chart_index.0];

        if matches!(chart.state, ChartState::MarkedObsolete | ChartState::Obsoleted) {
            chart.state = ChartState::Recovered;
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.charts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chart> {
        self.charts.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Chart> {
        self.charts.iter_mut()
    }

    fn require(&self, chart_id: &str) -> Result<ChartIndex, ChartError> {
        self.position(chart_id)
            .ok_or_else(|| ChartError::UnknownChart(chart_id.to_string()))
    }
}
