use std::fs::File;
use std::io::{BufReader, BufWriter};

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tch::Device;
use utgpt::backend::BackendOptions;
use utgpt::config::{write_model_config, GptModelArgs, TomlRead};
use utgpt::stage::{GptModelStage, Scope};

use crate::traits::UtGptApp;

const AGGLOMERATION: &str = "AGGLOMERATION";
const CONFIG: &str = "CONFIG";
const CONVOLUTION_WIDTH: &str = "CONVOLUTION_WIDTH";
const CONVOLUTIONS: &str = "CONVOLUTIONS";
const DEPTH: &str = "DEPTH";
const GPU: &str = "GPU";
const HEADS: &str = "HEADS";
const MODEL_CONFIG: &str = "MODEL_CONFIG";
const NUM_INTEROP_THREADS: &str = "NUM_INTEROP_THREADS";
const NUM_INTRAOP_THREADS: &str = "NUM_INTRAOP_THREADS";
const OUTPUT: &str = "OUTPUT";
const SEQ_LEN: &str = "SEQ_LEN";
const SUMMARY: &str = "SUMMARY";
const VOCAB_SIZE: &str = "VOCAB_SIZE";
const WIDTH: &str = "WIDTH";

/// Model arguments that were given on the command line.
#[derive(Debug, Default, Eq, PartialEq)]
struct ArgOverrides {
    convolution_width: Option<i64>,
    depth: Option<i64>,
    num_heads: Option<i64>,
    print_summary: bool,
    use_agglomeration: bool,
    use_convolutions: bool,
    width: Option<i64>,
}

impl ArgOverrides {
    fn apply(&self, args: &mut GptModelArgs) {
        if let Some(convolution_width) = self.convolution_width {
            args.convolution_width = convolution_width;
        }
        if let Some(depth) = self.depth {
            args.depth = depth;
        }
        if let Some(num_heads) = self.num_heads {
            args.num_heads = num_heads;
        }
        if let Some(width) = self.width {
            args.width = width;
        }

        args.print_summary |= self.print_summary;
        args.use_agglomeration |= self.use_agglomeration;
        args.use_convolutions |= self.use_convolutions;
    }
}

pub struct BuildApp {
    backend: BackendOptions,
    config: Option<String>,
    model_config: Option<String>,
    output: Option<String>,
    overrides: ArgOverrides,
    sequence_length: i64,
    vocabulary_size: i64,
}

impl BuildApp {
    /// Stage arguments from the configuration file, with command line
    /// arguments taking precedence.
    fn model_args(&self) -> Result<GptModelArgs> {
        let mut args = match &self.config {
            Some(config) => {
                let config_file = File::open(config)
                    .context(format!("Cannot open model arguments: {}", config))?;
                GptModelArgs::from_toml_read(BufReader::new(config_file))
                    .context(format!("Cannot parse model arguments: {}", config))?
            }
            None => GptModelArgs::default(),
        };

        self.overrides.apply(&mut args);

        Ok(args)
    }
}

fn parse_optional<T>(matches: &ArgMatches, name: &str, what: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    matches
        .get_one::<String>(name)
        .map(|v| v.parse().context(format!("Cannot parse {}: {}", what, v)))
        .transpose()
}

impl UtGptApp for BuildApp {
    fn app() -> Command {
        Command::new("build")
            .arg_required_else_help(true)
            .about("Construct a Universal Transformer GPT model")
            .arg(
                Arg::new(VOCAB_SIZE)
                    .long("vocab-size")
                    .value_name("N")
                    .required(true)
                    .help("Vocabulary size"),
            )
            .arg(
                Arg::new(SEQ_LEN)
                    .long("seq-len")
                    .value_name("N")
                    .required(true)
                    .help("Maximum sequence length"),
            )
            .arg(
                Arg::new(CONFIG)
                    .long("config")
                    .value_name("FILE")
                    .num_args(1)
                    .help("Model arguments in TOML format"),
            )
            .arg(
                Arg::new(WIDTH)
                    .short('w')
                    .long("width")
                    .value_name("N")
                    .num_args(1)
                    .help("Working width of the model [default: 64]"),
            )
            .arg(
                Arg::new(DEPTH)
                    .short('d')
                    .long("depth")
                    .value_name("N")
                    .num_args(1)
                    .help("Number of transformer block applications [default: 6]"),
            )
            .arg(
                Arg::new(CONVOLUTIONS)
                    .short('c')
                    .long("convolutions")
                    .action(ArgAction::SetTrue)
                    .help("Use causal convolutions instead of coordinate embeddings"),
            )
            .arg(
                Arg::new(AGGLOMERATION)
                    .short('a')
                    .long("agglomeration")
                    .action(ArgAction::SetTrue)
                    .help("Use agglomerative instead of full attention"),
            )
            .arg(
                Arg::new(CONVOLUTION_WIDTH)
                    .long("convolution-width")
                    .value_name("N")
                    .num_args(1)
                    .help("Width of the causal convolutions [default: 8]"),
            )
            .arg(
                Arg::new(HEADS)
                    .short('n')
                    .long("heads")
                    .value_name("N")
                    .num_args(1)
                    .help("Number of attention or agglomeration heads [default: 8]"),
            )
            .arg(
                Arg::new(SUMMARY)
                    .short('p')
                    .long("summary")
                    .action(ArgAction::SetTrue)
                    .help("Print a summary of the model"),
            )
            .arg(
                Arg::new(GPU)
                    .long("gpu")
                    .num_args(1)
                    .help("Use the GPU with the given identifier"),
            )
            .arg(
                Arg::new(OUTPUT)
                    .long("output")
                    .value_name("FILE")
                    .num_args(1)
                    .help("Save the model parameters"),
            )
            .arg(
                Arg::new(MODEL_CONFIG)
                    .long("model-config")
                    .value_name("FILE")
                    .num_args(1)
                    .help("Save the model configuration in JSON format"),
            )
            .arg(
                Arg::new(NUM_INTEROP_THREADS)
                    .help("Inter op parallelism threads")
                    .long("interop-threads")
                    .value_name("N")
                    .num_args(1),
            )
            .arg(
                Arg::new(NUM_INTRAOP_THREADS)
                    .help("Intra op parallelism threads")
                    .long("intraop-threads")
                    .value_name("N")
                    .num_args(1),
            )
    }

    fn parse(matches: &ArgMatches) -> Result<Self> {
        let config = matches.get_one::<String>(CONFIG).map(ToOwned::to_owned);
        let device = match matches.get_one::<String>(GPU) {
            Some(gpu) => Device::Cuda(
                gpu.parse()
                    .context(format!("Cannot parse GPU number ({})", gpu))?,
            ),
            None => Device::Cpu,
        };
        let interop_threads =
            parse_optional(matches, NUM_INTEROP_THREADS, "number of inter op threads")?;
        let intraop_threads =
            parse_optional(matches, NUM_INTRAOP_THREADS, "number of intra op threads")?;
        let model_config = matches
            .get_one::<String>(MODEL_CONFIG)
            .map(ToOwned::to_owned);
        let output = matches.get_one::<String>(OUTPUT).map(ToOwned::to_owned);
        let sequence_length = parse_optional(matches, SEQ_LEN, "sequence length")?
            .context("Sequence length is required")?;
        let vocabulary_size = parse_optional(matches, VOCAB_SIZE, "vocabulary size")?
            .context("Vocabulary size is required")?;

        let overrides = ArgOverrides {
            convolution_width: parse_optional(matches, CONVOLUTION_WIDTH, "convolution width")?,
            depth: parse_optional(matches, DEPTH, "depth")?,
            num_heads: parse_optional(matches, HEADS, "number of heads")?,
            print_summary: matches.get_flag(SUMMARY),
            use_agglomeration: matches.get_flag(AGGLOMERATION),
            use_convolutions: matches.get_flag(CONVOLUTIONS),
            width: parse_optional(matches, WIDTH, "width")?,
        };

        Ok(BuildApp {
            backend: BackendOptions {
                device,
                interop_threads,
                intraop_threads,
            },
            config,
            model_config,
            output,
            overrides,
            sequence_length,
            vocabulary_size,
        })
    }

    fn run(&self) -> Result<()> {
        let args = self.model_args()?;

        let mut scope = Scope::new();
        scope.set_sequence_length(self.sequence_length);
        scope.set_vocabulary_size(self.vocabulary_size);

        GptModelStage::new(args, self.backend.clone())
            .run(&mut scope)
            .context("Cannot construct model")?;

        let built = scope
            .take_model()
            .context("Model stage did not produce a model")?;

        if let Some(output) = &self.output {
            log::info!("Saving model parameters to {}", output);
            built
                .vs
                .save(output)
                .context(format!("Cannot save model parameters: {}", output))?;
        }

        if let Some(model_config) = &self.model_config {
            log::info!("Saving model configuration to {}", model_config);
            let config_file = File::create(model_config).context(format!(
                "Cannot create model configuration file: {}",
                model_config
            ))?;
            write_model_config(&built.config, BufWriter::new(config_file))
                .context(format!("Cannot write model configuration: {}", model_config))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tch::Device;
    use utgpt::config::GptModelArgs;

    use super::{ArgOverrides, BuildApp};
    use crate::traits::UtGptApp;

    fn parse(args: &[&str]) -> BuildApp {
        let matches = BuildApp::app()
            .try_get_matches_from(args.iter().copied())
            .unwrap();
        BuildApp::parse(&matches).unwrap()
    }

    #[test]
    fn build_uses_stage_defaults() {
        let app = parse(&["build", "--vocab-size", "100", "--seq-len", "32"]);
        assert_eq!(app.vocabulary_size, 100);
        assert_eq!(app.sequence_length, 32);
        assert_eq!(app.backend.device, Device::Cpu);
        assert_eq!(app.overrides, ArgOverrides::default());
        assert_eq!(app.model_args().unwrap(), GptModelArgs::default());
    }

    #[test]
    fn build_overrides_arguments() {
        let app = parse(&[
            "build",
            "--vocab-size",
            "100",
            "--seq-len",
            "32",
            "--width",
            "16",
            "-d",
            "2",
            "--convolutions",
            "--heads",
            "4",
            "--gpu",
            "1",
            "--intraop-threads",
            "2",
        ]);

        assert_eq!(app.backend.device, Device::Cuda(1));
        assert_eq!(app.backend.intraop_threads, Some(2));
        assert_eq!(app.backend.interop_threads, None);
        assert_eq!(
            app.model_args().unwrap(),
            GptModelArgs {
                depth: 2,
                num_heads: 4,
                use_convolutions: true,
                width: 16,
                ..GptModelArgs::default()
            }
        );
    }

    #[test]
    fn overrides_take_precedence_over_configuration() {
        let mut args = GptModelArgs {
            convolution_width: 4,
            depth: 3,
            use_agglomeration: true,
            ..GptModelArgs::default()
        };

        ArgOverrides {
            depth: Some(12),
            use_convolutions: true,
            ..ArgOverrides::default()
        }
        .apply(&mut args);

        assert_eq!(
            args,
            GptModelArgs {
                convolution_width: 4,
                depth: 12,
                use_agglomeration: true,
                use_convolutions: true,
                ..GptModelArgs::default()
            }
        );
    }

    #[test]
    fn build_rejects_invalid_numbers() {
        let matches = BuildApp::app()
            .try_get_matches_from(["build", "--vocab-size", "many", "--seq-len", "32"])
            .unwrap();
        assert!(BuildApp::parse(&matches).is_err());
    }
}
