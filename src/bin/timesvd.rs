extern crate clap;
extern crate env_logger;
extern crate failure;
#[macro_use]
extern crate log;
extern crate serde_json;
extern crate timesvd;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use timesvd::data::{RecordLayout, RecordStream};
use timesvd::evaluation::predict_stream;
use timesvd::models::Hyperparameters;
use timesvd::output::{write_annotated_predictions, write_predictions};
use timesvd::statistics::UserItemStatistics;
use timesvd::training::FitReport;
use timesvd::RatingModel;

/// Fit a timeSVD++ rating model on a rating file and predict held-out ratings.
///
/// Rating files hold one `user item day rating` record per line; test and
/// implicit-feedback files omit the rating. Set `RUST_LOG=info` to follow
/// training progress.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Training ratings
    #[arg(long)]
    train: PathBuf,

    /// Validation ratings, scored after every epoch for early stopping
    #[arg(long)]
    validation: PathBuf,

    /// Unlabeled records to predict
    #[arg(long, requires = "test_output")]
    test: Option<PathBuf>,

    /// Unlabeled records of every user interaction, rated or not
    #[arg(long)]
    implicit: Option<PathBuf>,

    /// Where to write one prediction per test record
    #[arg(long)]
    test_output: Option<PathBuf>,

    /// Where to write annotated predictions for the training records
    #[arg(long)]
    train_output: Option<PathBuf>,

    /// Where to save the fitted model
    #[arg(long)]
    model_output: Option<PathBuf>,

    /// Where to write the JSON fit report
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long, default_value_t = 458_293)]
    num_users: usize,

    #[arg(long, default_value_t = 17_770)]
    num_items: usize,

    /// Number of latent factors
    #[arg(long, default_value_t = 100)]
    latent_dim: usize,

    #[arg(long, default_value_t = 0.007)]
    learning_rate: f64,

    #[arg(long, default_value_t = 0.01)]
    regularization: f64,

    /// Maximum number of epochs
    #[arg(long, default_value_t = 10)]
    epochs: usize,

    /// Width in days of the item-bias time bins
    #[arg(long, default_value_t = 75)]
    bin_width: u32,

    /// Last day covered by the time bins
    #[arg(long, default_value_t = 2243)]
    max_day: u32,

    /// Exponent of the user drift deviation
    #[arg(long, default_value_t = 0.4)]
    drift_exponent: f64,

    /// Logarithm base of the rating-frequency bins, greater than 1
    #[arg(long, default_value_t = 6.76)]
    frequency_base: f64,

    /// Number of rating-frequency bins
    #[arg(long, default_value_t = 5)]
    frequency_bins: usize,

    /// Fix the global mean rating instead of taking it from the training ratings
    #[arg(long)]
    global_mean: Option<f64>,

    /// Seed of the factor initialization
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Fit the bias-only baseline instead of timeSVD++
    #[arg(long)]
    baseline: bool,
}

fn open(cli: &Cli, path: &Path, layout: RecordLayout) -> Result<RecordStream, failure::Error> {
    Ok(RecordStream::open(path, layout)?.with_bounds(cli.num_users, cli.num_items))
}

fn hyperparameters(cli: &Cli) -> Hyperparameters {
    let hyper = Hyperparameters::new(cli.num_users, cli.num_items)
        .latent_dim(cli.latent_dim)
        .learning_rate(cli.learning_rate)
        .regularization(cli.regularization)
        .num_epochs(cli.epochs)
        .bin_width(cli.bin_width)
        .max_day(cli.max_day)
        .drift_exponent(cli.drift_exponent)
        .frequency_base(cli.frequency_base)
        .num_frequency_bins(cli.frequency_bins)
        .seed(cli.seed);

    match cli.global_mean {
        Some(global_mean) => hyper.global_mean(global_mean),
        None => hyper,
    }
}

fn write_outputs<T: RatingModel>(
    cli: &Cli,
    model: &T,
    report: &FitReport,
    train: &mut RecordStream,
) -> Result<(), failure::Error> {
    info!(
        "Validation RMSE {:.6} after {:?}",
        report.final_validation_error().sqrt(),
        report.state
    );

    if let Some(path) = &cli.train_output {
        let predictions = predict_stream(model, train)?;
        write_annotated_predictions(path, &predictions)?;
        info!("Wrote {} training predictions to {}", predictions.len(), path.display());
    }

    if let (Some(test_path), Some(output_path)) = (&cli.test, &cli.test_output) {
        let mut test = open(cli, test_path, RecordLayout::Unlabeled)?;
        let predictions = predict_stream(model, &mut test)?;
        write_predictions(output_path, &predictions)?;
        info!("Wrote {} test predictions to {}", predictions.len(), output_path.display());
    }

    if let Some(path) = &cli.report {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, report)?;
    }

    Ok(())
}

fn run(cli: &Cli) -> Result<(), failure::Error> {
    let mut train = open(cli, &cli.train, RecordLayout::Labeled)?;
    let mut validation = open(cli, &cli.validation, RecordLayout::Labeled)?;
    let mut implicit = match &cli.implicit {
        Some(path) => Some(open(cli, path, RecordLayout::Unlabeled)?),
        None => None,
    };

    let statistics = UserItemStatistics::from_streams(
        &mut train,
        implicit.as_mut(),
        cli.num_users,
        cli.num_items,
    )?;
    info!(
        "Read {} training ratings, mean rating {:.4}",
        statistics.num_ratings(),
        statistics.mean_rating()
    );

    let hyper = hyperparameters(cli);
    debug!("{:?}", hyper);

    if cli.baseline {
        let mut model = hyper.build_baseline(statistics)?;
        let report = model.fit(&mut train, &mut validation)?;

        if let Some(path) = &cli.model_output {
            model.save(path)?;
        }

        write_outputs(cli, &model, &report, &mut train)
    } else {
        let mut model = hyper.build(statistics)?;
        let report = model.fit(&mut train, &mut validation)?;

        if let Some(path) = &cli.model_output {
            model.save(path)?;
        }

        write_outputs(cli, &model, &report, &mut train)
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    if let Err(error) = run(&cli) {
        eprintln!("error: {}", error);
        for cause in error.iter_causes() {
            eprintln!("  caused by: {}", cause);
        }
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_library() {
        let cli = Cli::try_parse_from(["timesvd", "--train", "a", "--validation", "b"]).unwrap();

        assert_eq!(
            hyperparameters(&cli),
            Hyperparameters::new(458_293, 17_770)
                .latent_dim(100)
                .learning_rate(0.007)
                .regularization(0.01)
                .num_epochs(10)
        );
    }

    #[test]
    fn temporal_constants_are_configurable() {
        let cli = Cli::try_parse_from([
            "timesvd",
            "--train",
            "a",
            "--validation",
            "b",
            "--num-users",
            "10",
            "--num-items",
            "20",
            "--bin-width",
            "30",
            "--max-day",
            "400",
            "--drift-exponent",
            "0.5",
            "--frequency-base",
            "2",
            "--frequency-bins",
            "3",
            "--global-mean",
            "3.6",
        ])
        .unwrap();

        assert_eq!(
            hyperparameters(&cli),
            Hyperparameters::new(10, 20)
                .latent_dim(100)
                .learning_rate(0.007)
                .regularization(0.01)
                .num_epochs(10)
                .bin_width(30)
                .max_day(400)
                .drift_exponent(0.5)
                .frequency_base(2.0)
                .num_frequency_bins(3)
                .global_mean(3.6)
        );
    }

    #[test]
    fn test_predictions_need_an_output() {
        assert!(Cli::try_parse_from([
            "timesvd",
            "--train",
            "a",
            "--validation",
            "b",
            "--test",
            "c",
        ])
        .is_err());
    }
}
