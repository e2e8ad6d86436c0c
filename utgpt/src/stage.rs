//! GPT model construction stage.

use tch::nn::VarStore;
use utgpt_transformers::models::gpt::{UniversalTransformerConfig, UniversalTransformerGpt};

use crate::backend::{maybe_setup_backend, BackendOptions};
use crate::config::GptModelArgs;
use crate::error::UtGptError;
use crate::summary::ModelSummary;

/// A constructed model together with its variables.
#[derive(Debug)]
pub struct BuiltModel {
    /// The configuration that the model was constructed with.
    pub config: UniversalTransformerConfig,

    /// The model.
    pub model: UniversalTransformerGpt,

    /// The variables of the model.
    pub vs: VarStore,
}

/// Values that are shared between pipeline stages.
///
/// Earlier stages provide the vocabulary size and sequence length of
/// the data set. The model stage stores the constructed model, which
/// can then be used by later stages.
#[derive(Debug, Default)]
pub struct Scope {
    model: Option<BuiltModel>,
    sequence_length: Option<i64>,
    vocabulary_size: Option<i64>,
}

impl Scope {
    pub fn new() -> Self {
        Scope::default()
    }

    /// The constructed model, if any.
    pub fn model(&self) -> Option<&BuiltModel> {
        self.model.as_ref()
    }

    /// The sequence length of the data set.
    pub fn sequence_length(&self) -> Result<i64, UtGptError> {
        self.sequence_length
            .ok_or(UtGptError::MissingScopeValue("sequence_length"))
    }

    pub fn set_model(&mut self, model: BuiltModel) {
        self.model = Some(model);
    }

    pub fn set_sequence_length(&mut self, sequence_length: i64) {
        self.sequence_length = Some(sequence_length);
    }

    pub fn set_vocabulary_size(&mut self, vocabulary_size: i64) {
        self.vocabulary_size = Some(vocabulary_size);
    }

    /// Remove the constructed model from the scope.
    pub fn take_model(&mut self) -> Option<BuiltModel> {
        self.model.take()
    }

    /// The vocabulary size of the data set.
    pub fn vocabulary_size(&self) -> Result<i64, UtGptError> {
        self.vocabulary_size
            .ok_or(UtGptError::MissingScopeValue("vocabulary_size"))
    }
}

/// Stage that constructs a Universal Transformer GPT model.
#[derive(Clone, Debug)]
pub struct GptModelStage {
    args: GptModelArgs,
    backend: BackendOptions,
}

impl GptModelStage {
    pub fn new(args: GptModelArgs, backend: BackendOptions) -> Self {
        GptModelStage { args, backend }
    }

    /// Construct the model.
    ///
    /// The vocabulary size and sequence length are read from `scope`,
    /// the constructed model is stored in `scope`.
    pub fn run(&self, scope: &mut Scope) -> Result<(), UtGptError> {
        let vocabulary_size = scope.vocabulary_size()?;
        let sequence_length = scope.sequence_length()?;

        maybe_setup_backend(&self.backend);

        let config = self.args.model_config(vocabulary_size, sequence_length);

        let vs = VarStore::new(self.backend.device);
        let model = UniversalTransformerGpt::new(vs.root(), &config)?;

        let summary = ModelSummary::from_var_store(&vs);
        log::info!(
            "Constructed model with depth {}, width {} and {} parameters",
            config.transformer_depth,
            config.word_embedding_size,
            summary.n_parameters()
        );

        if self.args.print_summary {
            println!("{}", summary);
        }

        scope.set_model(BuiltModel { config, model, vs });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tch::{Device, Kind, Tensor};

    use super::{GptModelStage, Scope};
    use crate::backend::BackendOptions;
    use crate::config::GptModelArgs;
    use crate::error::UtGptError;

    fn small_args() -> GptModelArgs {
        GptModelArgs {
            depth: 2,
            num_heads: 2,
            width: 8,
            ..GptModelArgs::default()
        }
    }

    fn small_scope() -> Scope {
        let mut scope = Scope::new();
        scope.set_sequence_length(5);
        scope.set_vocabulary_size(12);
        scope
    }

    fn layer_names(scope: &Scope) -> BTreeSet<String> {
        scope
            .model()
            .unwrap()
            .vs
            .variables()
            .into_keys()
            .filter_map(|name| name.split('.').next().map(ToOwned::to_owned))
            .collect()
    }

    #[test]
    fn stage_requires_scope_values() {
        let stage = GptModelStage::new(small_args(), BackendOptions::default());

        let mut scope = Scope::new();
        scope.set_sequence_length(5);
        assert!(matches!(
            stage.run(&mut scope),
            Err(UtGptError::MissingScopeValue("vocabulary_size"))
        ));

        let mut scope = Scope::new();
        scope.set_vocabulary_size(12);
        assert!(matches!(
            stage.run(&mut scope),
            Err(UtGptError::MissingScopeValue("sequence_length"))
        ));
        assert!(scope.model().is_none());
    }

    #[test]
    fn stage_stores_model() {
        let stage = GptModelStage::new(small_args(), BackendOptions::default());
        let mut scope = small_scope();
        stage.run(&mut scope).unwrap();

        let built = scope.take_model().unwrap();
        assert_eq!(built.config.max_seq_length, 5);
        assert_eq!(built.config.vocabulary_size, 12);
        assert!(built.config.use_coordinate_embeddings);

        let output = built
            .model
            .forward_t(
                &Tensor::randint(12, &[3, 5], (Kind::Int64, Device::Cpu)),
                false,
            )
            .unwrap();
        assert_eq!(output.probabilities.size(), &[3, 5, 12]);

        assert!(scope.model().is_none());
    }

    #[test]
    fn stage_convolutions_replace_coordinate_embeddings() {
        let stage = GptModelStage::new(small_args(), BackendOptions::default());
        let mut scope = small_scope();
        stage.run(&mut scope).unwrap();
        let layers = layer_names(&scope);
        assert!(layers.contains("coordinate_embedding"));
        assert!(!layers.contains("convolution"));

        let stage = GptModelStage::new(
            GptModelArgs {
                use_convolutions: true,
                ..small_args()
            },
            BackendOptions::default(),
        );
        let mut scope = small_scope();
        stage.run(&mut scope).unwrap();
        let layers = layer_names(&scope);
        assert!(!layers.contains("coordinate_embedding"));
        assert!(layers.contains("convolution"));
    }

    #[test]
    fn stage_reports_invalid_arguments() {
        let stage = GptModelStage::new(
            GptModelArgs {
                num_heads: 3,
                ..small_args()
            },
            BackendOptions::default(),
        );
        assert!(matches!(
            stage.run(&mut small_scope()),
            Err(UtGptError::TransformerError(_))
        ));
    }
}
