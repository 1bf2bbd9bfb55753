use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result as AnyhowResult};
use log::info;

use crate::regions::{Region, ThreePrimeEnd};
use crate::util::{create_out_directory, MISSING_SYMBOL};

pub trait OutWriter<T> {
    fn write(&mut self, item: T) -> AnyhowResult<u64>;
}

/// Tab-separated per-region count table: region identity, the chosen
/// 3' end, then one count column per sample in canonical sample order.
pub struct RegionTableWriter<W: Write> {
    csv_writer: csv::Writer<W>,
    n_samples: usize,
}

impl RegionTableWriter<BufWriter<File>> {
    pub fn new_to_path(
        out_path: &PathBuf,
        sample_names: &[String],
    ) -> AnyhowResult<Self> {
        create_out_directory(out_path)?;
        let fh = File::create(out_path)
            .with_context(|| format!("failed to create {out_path:?}"))?;
        Self::new(BufWriter::new(fh), sample_names)
    }
}

impl<W: Write> RegionTableWriter<W> {
    pub fn new(writer: W, sample_names: &[String]) -> AnyhowResult<Self> {
        let mut csv_writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(writer);
        let mut header = vec![
            "chr".to_string(),
            "region_start".to_string(),
            "region_end".to_string(),
            "max_read_count".to_string(),
            "log_prob_sum".to_string(),
            "three_prime_chr".to_string(),
            "three_prime_pos".to_string(),
            "three_prime_strand".to_string(),
            "three_prime_read_count".to_string(),
        ];
        header.extend(
            sample_names.iter().map(|name| format!("{name}_count")),
        );
        csv_writer.write_record(&header)?;
        Ok(Self { csv_writer, n_samples: sample_names.len() })
    }
}

impl<W: Write> OutWriter<&[Region]> for RegionTableWriter<W> {
    fn write(&mut self, regions: &[Region]) -> AnyhowResult<u64> {
        let mut rows_written = 0u64;
        for region in regions {
            let (end_chr, end_pos, end_strand, end_count) = match &region
                .chosen
            {
                Some(ThreePrimeEnd::Present {
                    ref_name,
                    pos,
                    strand,
                    read_count,
                }) => (
                    ref_name.clone(),
                    format!("{pos}"),
                    format!("{}", strand.to_int()),
                    format!("{read_count}"),
                ),
                Some(ThreePrimeEnd::Absent { strand }) => (
                    MISSING_SYMBOL.to_string(),
                    MISSING_SYMBOL.to_string(),
                    format!("{}", strand.to_int()),
                    MISSING_SYMBOL.to_string(),
                ),
                None => (
                    MISSING_SYMBOL.to_string(),
                    MISSING_SYMBOL.to_string(),
                    format!("{}", region.strand.to_int()),
                    MISSING_SYMBOL.to_string(),
                ),
            };
            anyhow::ensure!(
                region.sample_counts.len() == self.n_samples,
                "region {} has {} sample counts, expected {}",
                region.identity_string(),
                region.sample_counts.len(),
                self.n_samples
            );
            let mut row = vec![
                region.ref_name.clone(),
                format!("{}", region.start),
                format!("{}", region.end),
                format!("{}", region.max_read_count),
                format!("{}", region.log_prob_sum),
                end_chr,
                end_pos,
                end_strand,
                end_count,
            ];
            row.extend(
                region.sample_counts.iter().map(|count| format!("{count}")),
            );
            self.csv_writer.write_record(&row)?;
            rows_written += 1;
        }
        self.csv_writer.flush()?;
        info!("wrote {rows_written} regions");
        Ok(rows_written)
    }
}
