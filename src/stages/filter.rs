use crate::config::PipelineConfig;
use crate::error::AmpliflowError;
use crate::fastq::{FastqReader, FastqRecord, FastqWriter};
use crate::stage::{Stage, StageInput, StageOutput, StageResult};
use crate::workspace::Workspace;

/// Quality screen: truncation to a fixed length, expected-error rejection,
/// ambiguous-base rejection, and length bounds. Paired input keeps a pair only
/// when both mates pass.
pub struct FilterStage;

impl FilterStage {
    fn keep(record: &mut FastqRecord, truncation: usize, config: &PipelineConfig) -> bool {
        if truncation > 0 && record.seq.len() < truncation {
            return false;
        }
        record.truncate(truncation);
        if record.seq.len() < config.min_length || record.seq.len() > config.max_length {
            return false;
        }
        if record.seq.bytes().any(|b| b == b'N' || b == b'n') {
            return false;
        }
        record.expected_errors() <= config.max_expected_errors
    }
}

impl Stage for FilterStage {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn validate(&self, config: &PipelineConfig) -> Result<(), AmpliflowError> {
        // Truncating below the minimum length would reject every read.
        for (label, truncation) in [
            ("forward", config.truncation_forward),
            ("reverse", config.truncation_reverse),
        ] {
            if truncation > 0 && truncation < config.min_length {
                return Err(AmpliflowError::InvalidParameter(format!(
                    "truncation_length.{label} {} is below min_length {}",
                    truncation, config.min_length
                )));
            }
        }
        Ok(())
    }

    fn run_sample(
        &self,
        input: &StageInput,
        _context: Option<&[u8]>,
        workspace: &Workspace,
        config: &PipelineConfig,
    ) -> Result<StageResult, AmpliflowError> {
        let truncations = [config.truncation_forward, config.truncation_reverse];

        let mut readers = input
            .files
            .iter()
            .map(|path| FastqReader::open(path))
            .collect::<Result<Vec<_>, _>>()?;

        let mut outputs = Vec::with_capacity(input.files.len());
        let mut writers = Vec::with_capacity(input.files.len());
        for path in &input.files {
            let file_name = path.file_name().ok_or_else(|| {
                AmpliflowError::Filesystem(format!("input without file name: {path}"))
            })?;
            let scratch = workspace.scratch_file(self.name(), &input.id, file_name);
            writers.push(FastqWriter::create(&scratch)?);
            outputs.push(StageOutput {
                scratch,
                dest: workspace.stage_file(self.name(), file_name),
            });
        }

        let mut retained = 0u64;
        'records: loop {
            let mut records = Vec::with_capacity(readers.len());
            for reader in &mut readers {
                match reader.next_record()? {
                    Some(record) => records.push(record),
                    None => break 'records,
                }
            }

            let mut pass = true;
            for (idx, record) in records.iter_mut().enumerate() {
                if !Self::keep(record, truncations[idx], config) {
                    pass = false;
                    break;
                }
            }
            if pass {
                for (writer, record) in writers.iter_mut().zip(&records) {
                    writer.write_record(record)?;
                }
                retained += 1;
            }
        }

        for writer in writers {
            writer.finish()?;
        }

        Ok(StageResult {
            id: input.id.clone(),
            outputs,
            count: retained,
        })
    }
}
