//! Model summaries.

use std::collections::BTreeMap;
use std::fmt;

use tch::nn::VarStore;

/// Summary of the variables of a layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LayerSummary {
    /// The name of the layer.
    pub name: String,

    /// Number of parameters in the layer.
    pub n_parameters: usize,

    /// The layer variables and their shapes, relative to the layer.
    pub variables: Vec<(String, Vec<i64>)>,
}

/// Summary of the variables of a model.
///
/// Variables are grouped by layer, where the layer is the first
/// component of a variable name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModelSummary {
    layers: Vec<LayerSummary>,
}

impl ModelSummary {
    /// Summarize the variables in `vs`.
    pub fn from_var_store(vs: &VarStore) -> Self {
        let mut layers: BTreeMap<String, Vec<(String, Vec<i64>)>> = BTreeMap::new();
        for (name, tensor) in vs.variables() {
            let (layer, variable) = match name.split_once('.') {
                Some((layer, variable)) => (layer.to_string(), variable.to_string()),
                None => (name.clone(), name.clone()),
            };
            layers
                .entry(layer)
                .or_default()
                .push((variable, tensor.size()));
        }

        let layers = layers
            .into_iter()
            .map(|(name, mut variables)| {
                variables.sort();
                LayerSummary {
                    n_parameters: variables
                        .iter()
                        .map(|(_, shape)| shape.iter().product::<i64>() as usize)
                        .sum(),
                    name,
                    variables,
                }
            })
            .collect();

        ModelSummary { layers }
    }

    /// Per-layer summaries, ordered by layer name.
    pub fn layers(&self) -> &[LayerSummary] {
        &self.layers
    }

    /// Total number of parameters.
    pub fn n_parameters(&self) -> usize {
        self.layers.iter().map(|layer| layer.n_parameters).sum()
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(72);

        writeln!(f, "{:<30} {:<28} {:>12}", "Layer", "Variable (shape)", "Params")?;
        writeln!(f, "{}", rule.replace('-', "="))?;

        for layer in &self.layers {
            for (idx, (variable, shape)) in layer.variables.iter().enumerate() {
                let layer_column = if idx == 0 { layer.name.as_str() } else { "" };
                let params_column = if idx == 0 {
                    layer.n_parameters.to_string()
                } else {
                    String::new()
                };

                writeln!(
                    f,
                    "{:<30} {:<28} {:>12}",
                    layer_column,
                    format!("{} {:?}", variable, shape),
                    params_column
                )?;
            }
            writeln!(f, "{}", rule)?;
        }

        write!(f, "Total params: {}", self.n_parameters())
    }
}
