use crate::sweep::{run_point, write_line};
use anyhow::{anyhow, bail, Context, Result};
use polariton_core::CavityConfig;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub struct BatchOptions {
    pub total_steps: usize,
    pub jobs: usize,
    pub work_dir: PathBuf,
    pub output: PathBuf,
    pub keep_parts: bool,
}

fn part_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("point_{index:06}.tsv"))
}

fn run_one(text: &str, options: &BatchOptions, index: usize) -> Result<()> {
    let config: CavityConfig = text.parse()?;
    let record = run_point(config, options.total_steps, index)?;
    write_line(&part_path(&options.work_dir, index), &record)
}

/// Runs every sweep index, each on its own cavity, then joins the per-index lines in index
/// order. Any failed index fails the batch.
pub fn run_batch(config_text: &str, options: &BatchOptions) -> Result<()> {
    if options.total_steps == 0 {
        bail!("batch needs at least one step");
    }
    fs::create_dir_all(&options.work_dir).with_context(|| {
        format!("cannot create work directory {}", options.work_dir.display())
    })?;

    let indices: Vec<usize> = (0..options.total_steps).collect();
    let run_all = || -> Vec<(usize, Result<()>)> {
        indices
            .par_iter()
            .map(|&index| (index, run_one(config_text, options, index)))
            .collect()
    };
    let outcomes = if options.jobs > 1 {
        ThreadPoolBuilder::new()
            .num_threads(options.jobs)
            .build()
            .map_err(|e| anyhow!("failed to build thread pool: {e}"))?
            .install(run_all)
    } else {
        indices
            .iter()
            .map(|&index| (index, run_one(config_text, options, index)))
            .collect()
    };

    let mut failed = 0usize;
    for (index, outcome) in &outcomes {
        if let Err(err) = outcome {
            error!(index, "sweep point failed: {err:#}");
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} sweep points failed", options.total_steps);
    }

    concatenate(&options.work_dir, options.total_steps, &options.output)?;
    if !options.keep_parts {
        for index in 0..options.total_steps {
            fs::remove_file(part_path(&options.work_dir, index))?;
        }
        // Leave the directory if it holds anything else.
        let _ = fs::remove_dir(&options.work_dir);
    }
    info!(
        points = options.total_steps,
        output = %options.output.display(),
        "batch finished"
    );
    Ok(())
}

/// Appends the per-index files to `output` in index order.
fn concatenate(dir: &Path, total_steps: usize, output: &Path) -> Result<()> {
    let missing: Vec<usize> = (0..total_steps)
        .filter(|&i| !part_path(dir, i).is_file())
        .collect();
    if !missing.is_empty() {
        bail!("missing output for sweep indices {missing:?}");
    }

    let file = File::create(output)
        .with_context(|| format!("cannot create output {}", output.display()))?;
    let mut out = BufWriter::new(file);
    for index in 0..total_steps {
        let path = part_path(dir, index);
        let mut part =
            File::open(&path).with_context(|| format!("cannot read {}", path.display()))?;
        io::copy(&mut part, &mut out)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "
[global]
random_seed = 9

[polariton a]
gamma = 1.0
initial_real = 0.5

[polariton b]
gamma = 1.0

[phonon m]

[coupling]
from = a
to = b
phonon = m
J = 1

[sweep]
stop = 3
drive = a
transient = 5
stationary = 5
stepper = fixed
";

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("polariton-batch-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn lines_come_out_in_index_order() {
        let dir = scratch_dir("order");
        let options = BatchOptions {
            total_steps: 4,
            jobs: 3,
            work_dir: dir.join("parts"),
            output: dir.join("out.tsv"),
            keep_parts: false,
        };
        run_batch(CONFIG, &options).unwrap();

        let text = fs::read_to_string(&options.output).unwrap();
        let params: Vec<f64> = text
            .lines()
            .map(|l| l.split('\t').next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(params.len(), 4);
        for (i, p) in params.iter().enumerate() {
            assert!((p - i as f64).abs() < 1e-12);
        }
        assert!(!options.work_dir.exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failing_points_fail_the_batch() {
        let dir = scratch_dir("fail");
        let options = BatchOptions {
            total_steps: 2,
            jobs: 1,
            work_dir: dir.join("parts"),
            output: dir.join("out.tsv"),
            keep_parts: true,
        };
        let broken = CONFIG.replace("drive = a", "drive = nowhere");
        assert!(run_batch(&broken, &options).is_err());
        assert!(!options.output.exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_part_is_reported() {
        let dir = scratch_dir("missing");
        fs::write(part_path(&dir, 0), "0\t1\n").unwrap();
        let err = concatenate(&dir, 2, &dir.join("out.tsv")).unwrap_err();
        assert!(format!("{err}").contains("[1]"));
        fs::remove_dir_all(&dir).unwrap();
    }
}
