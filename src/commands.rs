use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Subcommand};
use log::info;
use rayon::ThreadPoolBuilder;

use crate::config::Config;
use crate::downsample::{count_pairs, downsample, PairingSense};
use crate::errs::EcError;
use crate::hmm::SubprocessSegmenter;
use crate::logging::init_logging;
use crate::pipeline::Pipeline;
use crate::sequence::FastaSource;
use crate::writers::{OutWriter, RegionTableWriter};

#[derive(Subcommand)]
pub enum Commands {
    /// Run the 3'-end discovery and counting pipeline over the inputs
    /// named in a project YAML, producing a per-region per-sample count
    /// table. Completed per-job artifacts under the working directory
    /// are reused, so an interrupted run resumes where it stopped.
    Run(RunPipeline),
    /// Downsample a BAM to a target number of read pairs, keeping mate
    /// pairs intact and the source header unchanged.
    Downsample(Downsample),
}

impl Commands {
    pub fn run(&self) -> anyhow::Result<()> {
        match self {
            Self::Run(x) => x.run(),
            Self::Downsample(x) => x.run(),
        }
    }
}

#[derive(Args)]
#[command(arg_required_else_help = true)]
pub struct RunPipeline {
    /// Path to the project configuration YAML.
    config: PathBuf,
    /// Path to write the per-region count table.
    #[arg(short = 'o', long)]
    out_table: PathBuf,
    /// Directory holding per-job artifacts. Reused across runs.
    #[arg(long, default_value = "endcount_work")]
    work_dir: PathBuf,
    /// Number of threads to use.
    #[arg(short = 't', long, default_value_t = 4)]
    threads: usize,
    /// File to write logs to, it's recommended to use this option.
    #[arg(long, alias = "log")]
    log_filepath: Option<PathBuf>,
    /// Skip the scan that checks each configured barcode against its
    /// input's read names.
    #[arg(long, default_value_t = false, hide_short_help = true)]
    skip_tag_scan: bool,
    /// Hide the progress bars.
    #[arg(long, default_value_t = false, hide_short_help = true)]
    suppress_progress: bool,
    /// Force overwrite of the output table, if it already exists.
    #[arg(short = 'f', long, default_value_t = false)]
    force: bool,
}

impl RunPipeline {
    pub fn run(&self) -> anyhow::Result<()> {
        let _handle = init_logging(self.log_filepath.as_ref());
        if self.out_table.exists() && !self.force {
            bail!(
                "refusing to overwrite {:?} without --force",
                self.out_table
            );
        }
        let config = Config::from_yaml_file(&self.config)
            .context("failed to load configuration")?;
        if self.skip_tag_scan {
            info!("skipping barcode presence scan");
        } else {
            config.validate_inputs()?;
        }
        info!(
            "running analysis {} over {} samples in {} inputs",
            config.name,
            config.samples.len(),
            config.inputs().len()
        );

        let fasta_fp = config.ref_fasta.as_ref().ok_or_else(|| {
            EcError::ConfigInvalid(
                "ref_fasta is required, remote sequence retrieval is \
                 delegated to the annotation resolver"
                    .to_string(),
            )
        })?;
        let source = FastaSource::from_path(fasta_fp)?;
        let segmenter = SubprocessSegmenter::new(config.hmm_binary.clone());

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .context("failed to build thread pool")?;
        let pipeline = Pipeline::new(
            &config,
            self.work_dir.clone(),
            &segmenter,
            &source,
            self.suppress_progress,
        )?;
        pool.install(|| pipeline.run())?;

        let regions = pipeline.collect_regions()?;
        let mut writer = RegionTableWriter::new_to_path(
            &self.out_table,
            pipeline.sample_names(),
        )?;
        let rows = writer.write(&regions)?;
        info!("finished, {rows} regions in {:?}", self.out_table);
        Ok(())
    }
}

#[derive(Args)]
#[command(arg_required_else_help = true)]
pub struct Downsample {
    /// Input BAM to sample pairs from.
    in_bam: PathBuf,
    /// Path to the downsampled output BAM.
    #[arg(short = 'o', long)]
    out_bam: PathBuf,
    /// Number of read pairs to retain.
    #[arg(short = 'n', long)]
    target: u64,
    /// Which pairs participate in sampling.
    #[arg(long, default_value = "paired")]
    sense: PairingSense,
    /// Number of eligible pairs in the input; counted with an extra
    /// pass when omitted.
    #[arg(long, hide_short_help = true)]
    source_count: Option<u64>,
    /// Seed for the keep/drop draws, fixed seeds give reproducible
    /// output.
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// File to write logs to.
    #[arg(long, alias = "log")]
    log_filepath: Option<PathBuf>,
}

impl Downsample {
    pub fn run(&self) -> anyhow::Result<()> {
        let _handle = init_logging(self.log_filepath.as_ref());
        let source = match self.source_count {
            Some(n) => n,
            None => count_pairs(&self.in_bam, self.sense)?,
        };
        if self.target > source {
            bail!(
                "target {} exceeds the {source} eligible pairs in {:?}",
                self.target,
                self.in_bam
            );
        }
        let kept = downsample(
            &self.in_bam,
            &self.out_bam,
            self.target,
            source,
            self.sense,
            self.seed,
        )?;
        info!("wrote {kept} pairs to {:?}", self.out_bam);
        Ok(())
    }
}
