use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tiny_stn::config::{DataFormat, TrainConfig};
use tiny_stn::stn::model::CIFAR_CLASSES;
use tiny_stn::utils::cifar::CifarData;
use tiny_stn::utils::dataloader::DataLoader;
use tiny_stn::utils::head::NllLoss;
use tiny_stn::utils::misc::mean_loss;
use tiny_stn::utils::network::Network;
use tiny_stn::utils::nn_trait::DataSet;
use tiny_stn::utils::optimizer::Sgd;
use tiny_stn::utils::visualize::save_comparison;
use tiny_stn::{ExecutionContext, SpatialTransformerNet};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tiny-stn")]
#[command(about = "Train a spatial transformer network on CIFAR-10")]
struct Cli {
    /// TOML file with training settings; flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset root (train/ and test/ image dirs, or the binary batches)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Use CIFAR-10 binary batches instead of image directories
    #[arg(long)]
    binary: bool,

    #[arg(short, long)]
    epochs: Option<usize>,

    #[arg(short, long)]
    batch_size: Option<usize>,

    #[arg(long)]
    lr: Option<f32>,

    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads, 0 for one per CPU
    #[arg(short, long)]
    threads: Option<usize>,

    /// Load at most this many samples per split
    #[arg(long)]
    limit: Option<usize>,

    /// Write a PNG of inputs and their transformed versions after training
    #[arg(long)]
    samples_out: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<TrainConfig> {
        let mut config = match &self.config {
            Some(path) => TrainConfig::from_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => TrainConfig::default(),
        };
        if let Some(v) = self.data_dir {
            config.data_dir = v;
        }
        if self.binary {
            config.format = DataFormat::Binary;
        }
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.lr {
            config.learning_rate = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.threads {
            config.threads = v;
        }
        if self.limit.is_some() {
            config.limit = self.limit;
        }
        if self.samples_out.is_some() {
            config.samples_out = self.samples_out;
        }
        config.validate()?;
        Ok(config)
    }
}

fn load_split(config: &TrainConfig, train: bool) -> Result<CifarData> {
    let norm = config.normalization();
    let data = match config.format {
        DataFormat::Images => {
            let dir = config.data_dir.join(if train { "train" } else { "test" });
            CifarData::from_image_dir(&dir, config.limit, &norm)
                .with_context(|| format!("loading images from {}", dir.display()))?
        }
        DataFormat::Binary => {
            let files = if train {
                (1..=5)
                    .map(|i| config.data_dir.join(format!("data_batch_{}.bin", i)))
                    .collect::<Vec<_>>()
            } else {
                vec![config.data_dir.join("test_batch.bin")]
            };
            CifarData::from_binary(&files, config.limit, &norm)
                .with_context(|| format!("loading batches from {}", config.data_dir.display()))?
        }
    };
    Ok(data)
}

fn train_epoch(
    network: &mut Network<SpatialTransformerNet>,
    optimizer: &Sgd,
    dataset: &CifarData,
    config: &TrainConfig,
    epoch: usize,
) -> Result<f32> {
    network.set_training(true);
    let seed = config.seed.wrapping_add((epoch as u64) << 10);
    let dataloader = DataLoader::new(dataset, config.batch_size, CIFAR_CLASSES, Some(seed));
    let batches = dataloader.num_batches();
    let mut total = 0.0;
    let mut iter = 0;
    for batch in dataloader {
        let (image, gt) = batch?;
        iter += 1;
        let pred = network.forward(image)?;
        let loss = mean_loss(&network.calc_loss(&pred, &gt)?);
        total += loss;
        if iter % config.log_interval == 0 {
            info!(epoch, iter, batches, loss, "train");
        }
        network.backward()?;
        network.update_parameters(optimizer)?;
    }
    Ok(if iter == 0 { 0.0 } else { total / iter as f32 })
}

fn evaluate(
    network: &mut Network<SpatialTransformerNet>,
    dataset: &CifarData,
    config: &TrainConfig,
) -> Result<(f32, usize)> {
    network.set_training(false);
    let dataloader = DataLoader::new(dataset, config.test_batch_size, CIFAR_CLASSES, None);
    let mut loss_sum = 0.0;
    let mut ok = 0;
    for batch in dataloader {
        let (image, gt) = batch?;
        let pred = network.forward(image)?;
        loss_sum += network.calc_loss(&pred, &gt)?.sum();
        let result = network.get_result(&pred);
        ok += result
            .iter()
            .enumerate()
            .filter(|(idx, res)| gt.at(*idx, **res) == 1.0)
            .count();
    }
    let len = dataset.len().max(1) as f32;
    Ok((loss_sum / len, ok))
}

fn save_samples(
    network: &mut Network<SpatialTransformerNet>,
    dataset: &CifarData,
    config: &TrainConfig,
    path: &Path,
) -> Result<()> {
    network.set_training(false);
    let mut loader = DataLoader::new(dataset, config.samples.max(1), CIFAR_CLASSES, None);
    let Some(batch) = loader.next() else {
        warn!("no samples to visualize");
        return Ok(());
    };
    let (image, _) = batch?;
    let model = network.model_mut();
    let shape = model.input_shape();
    let transformed = model.transform(image.clone())?;
    save_comparison(path, &image, &transformed, shape, &config.normalization())?;
    Ok(())
}

fn run(config: TrainConfig) -> Result<()> {
    let mut ctx = ExecutionContext::new(config.threads, config.seed)?;
    info!(threads = ctx.threads(), seed = ctx.seed(), "starting");

    let (train_dataset, test_dataset) =
        ctx.install(|| -> Result<_> { Ok((load_split(&config, true)?, load_split(&config, false)?)) })?;
    info!(
        train = train_dataset.len(),
        test = test_dataset.len(),
        "datasets loaded"
    );

    let model = SpatialTransformerNet::cifar(&mut ctx)?;
    let mut network = Network::new(model, Box::new(NllLoss::new()));
    let optimizer = Sgd::new(config.learning_rate, config.momentum, config.weight_decay);

    ctx.install(|| -> Result<()> {
        for epoch in 0..config.epochs {
            let train_loss = train_epoch(&mut network, &optimizer, &train_dataset, &config, epoch)?;
            info!(epoch, train_loss, "epoch finished, testing");
            let (test_loss, ok) = evaluate(&mut network, &test_dataset, &config)?;
            info!(
                epoch,
                test_loss,
                "acc [{}/{}], {:.2}%",
                ok,
                test_dataset.len(),
                100.0 * ok as f32 / test_dataset.len().max(1) as f32
            );
        }
        if let Some(path) = &config.samples_out {
            save_samples(&mut network, &test_dataset, &config, path)?;
        }
        Ok(())
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config()?;
    run(config)
}
