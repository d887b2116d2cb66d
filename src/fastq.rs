use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use camino::Utf8Path;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use crate::error::AmpliflowError;

const PHRED_OFFSET: u8 = 33;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqRecord {
    pub name: String,
    pub seq: String,
    pub qual: String,
}

impl FastqRecord {
    /// Sum of per-base error probabilities from Phred+33 qualities, the
    /// expected-errors statistic used by the filter stage.
    pub fn expected_errors(&self) -> f64 {
        self.qual
            .bytes()
            .map(|q| {
                let phred = q.saturating_sub(PHRED_OFFSET) as f64;
                10f64.powf(-phred / 10.0)
            })
            .sum()
    }

    pub fn truncate(&mut self, length: usize) {
        if length > 0 && self.seq.len() > length {
            self.seq.truncate(length);
            self.qual.truncate(length);
        }
    }

    pub fn reverse_complement(&self) -> FastqRecord {
        let seq = self
            .seq
            .bytes()
            .rev()
            .map(|base| match base {
                b'A' => 'T',
                b'T' => 'A',
                b'G' => 'C',
                b'C' => 'G',
                b'a' => 't',
                b't' => 'a',
                b'g' => 'c',
                b'c' => 'g',
                other => other as char,
            })
            .collect();
        let qual = self.qual.chars().rev().collect();
        FastqRecord {
            name: self.name.clone(),
            seq,
            qual,
        }
    }
}

pub struct FastqReader {
    reader: Box<dyn BufRead>,
    path: String,
    line: u64,
}

impl FastqReader {
    pub fn open(path: &Utf8Path) -> Result<Self, AmpliflowError> {
        let file = File::open(path.as_std_path())
            .map_err(|err| AmpliflowError::Filesystem(format!("open {path}: {err}")))?;
        let reader: Box<dyn BufRead> = if path.as_str().ends_with(".gz") {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self {
            reader,
            path: path.to_string(),
            line: 0,
        })
    }

    pub fn next_record(&mut self) -> Result<Option<FastqRecord>, AmpliflowError> {
        let Some(name) = self.read_line()? else {
            return Ok(None);
        };
        let seq = self.require_line("sequence")?;
        let plus = self.require_line("separator")?;
        let qual = self.require_line("quality")?;

        if !name.starts_with('@') {
            return Err(self.malformed("record header does not start with '@'"));
        }
        if !plus.starts_with('+') {
            return Err(self.malformed("separator line does not start with '+'"));
        }
        if seq.len() != qual.len() {
            return Err(self.malformed("sequence and quality lengths differ"));
        }

        Ok(Some(FastqRecord { name, seq, qual }))
    }

    fn read_line(&mut self) -> Result<Option<String>, AmpliflowError> {
        let mut buf = String::new();
        let n = self
            .reader
            .read_line(&mut buf)
            .map_err(|err| AmpliflowError::Filesystem(format!("read {}: {err}", self.path)))?;
        if n == 0 {
            return Ok(None);
        }
        self.line += 1;
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }

    fn require_line(&mut self, what: &str) -> Result<String, AmpliflowError> {
        self.read_line()?
            .ok_or_else(|| self.malformed(&format!("truncated record, missing {what} line")))
    }

    fn malformed(&self, message: &str) -> AmpliflowError {
        AmpliflowError::MalformedRecord {
            path: self.path.clone(),
            message: format!("{message} (near line {})", self.line),
        }
    }
}

enum Sink {
    Plain(BufWriter<File>),
    Gz(GzEncoder<File>),
}

pub struct FastqWriter {
    sink: Sink,
    path: String,
}

impl FastqWriter {
    pub fn create(path: &Utf8Path) -> Result<Self, AmpliflowError> {
        let file = File::create(path.as_std_path())
            .map_err(|err| AmpliflowError::Filesystem(format!("create {path}: {err}")))?;
        let sink = if path.as_str().ends_with(".gz") {
            Sink::Gz(GzEncoder::new(file, Compression::default()))
        } else {
            Sink::Plain(BufWriter::new(file))
        };
        Ok(Self {
            sink,
            path: path.to_string(),
        })
    }

    pub fn write_record(&mut self, record: &FastqRecord) -> Result<(), AmpliflowError> {
        let body = format!("{}\n{}\n+\n{}\n", record.name, record.seq, record.qual);
        let result = match &mut self.sink {
            Sink::Plain(writer) => writer.write_all(body.as_bytes()),
            Sink::Gz(writer) => writer.write_all(body.as_bytes()),
        };
        result.map_err(|err| AmpliflowError::Filesystem(format!("write {}: {err}", self.path)))
    }

    /// Flushes and, for gzip output, writes the stream trailer. Skipping this
    /// leaves a truncated file behind.
    pub fn finish(self) -> Result<(), AmpliflowError> {
        let result = match self.sink {
            Sink::Plain(mut writer) => writer.flush(),
            Sink::Gz(writer) => writer.finish().map(|_| ()),
        };
        result.map_err(|err| AmpliflowError::Filesystem(format!("flush {}: {err}", self.path)))
    }
}

/// FASTA with `;size=N` abundance annotations, the interchange format of the
/// denoise and chimera stages.
pub struct FastaWriter {
    writer: BufWriter<File>,
    path: String,
}

impl FastaWriter {
    pub fn create(path: &Utf8Path) -> Result<Self, AmpliflowError> {
        let file = File::create(path.as_std_path())
            .map_err(|err| AmpliflowError::Filesystem(format!("create {path}: {err}")))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_string(),
        })
    }

    pub fn write_sequence(
        &mut self,
        label: &str,
        abundance: u64,
        seq: &str,
    ) -> Result<(), AmpliflowError> {
        let body = format!(">{label};size={abundance}\n{seq}\n");
        self.writer
            .write_all(body.as_bytes())
            .map_err(|err| AmpliflowError::Filesystem(format!("write {}: {err}", self.path)))
    }

    pub fn finish(mut self) -> Result<(), AmpliflowError> {
        self.writer
            .flush()
            .map_err(|err| AmpliflowError::Filesystem(format!("flush {}: {err}", self.path)))
    }
}

/// Reads back `;size=N` FASTA produced by [`FastaWriter`].
pub fn read_fasta_abundances(path: &Utf8Path) -> Result<Vec<(String, u64)>, AmpliflowError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| AmpliflowError::Filesystem(format!("open {path}: {err}")))?;
    let reader = BufReader::new(file);

    let mut entries = Vec::new();
    let mut pending: Option<u64> = None;
    for line in reader.lines() {
        let line =
            line.map_err(|err| AmpliflowError::Filesystem(format!("read {path}: {err}")))?;
        if let Some(header) = line.strip_prefix('>') {
            let abundance = header
                .rsplit_once(";size=")
                .and_then(|(_, size)| size.parse().ok())
                .ok_or_else(|| AmpliflowError::MalformedRecord {
                    path: path.to_string(),
                    message: format!("missing ;size= annotation in header {header}"),
                })?;
            pending = Some(abundance);
        } else if let Some(abundance) = pending.take() {
            entries.push((line, abundance));
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_errors_from_qualities() {
        // 'I' is Phred 40 (p=1e-4), '!' is Phred 0 (p=1.0).
        let record = FastqRecord {
            name: "@r1".to_string(),
            seq: "AC".to_string(),
            qual: "I!".to_string(),
        };
        let ee = record.expected_errors();
        assert!((ee - 1.0001).abs() < 1e-6);
    }

    #[test]
    fn truncate_shortens_seq_and_qual() {
        let mut record = FastqRecord {
            name: "@r1".to_string(),
            seq: "ACGTACGT".to_string(),
            qual: "IIIIIIII".to_string(),
        };
        record.truncate(4);
        assert_eq!(record.seq, "ACGT");
        assert_eq!(record.qual, "IIII");

        // Zero disables truncation.
        record.truncate(0);
        assert_eq!(record.seq, "ACGT");
    }

    #[test]
    fn reverse_complement_round_trip() {
        let record = FastqRecord {
            name: "@r1".to_string(),
            seq: "AACGT".to_string(),
            qual: "IIIIH".to_string(),
        };
        let rc = record.reverse_complement();
        assert_eq!(rc.seq, "ACGTT");
        assert_eq!(rc.qual, "HIIII");
        assert_eq!(rc.reverse_complement().seq, record.seq);
    }

    #[test]
    fn fastq_round_trip_plain_and_gz() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["reads.fastq", "reads.fastq.gz"] {
            let path = camino::Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
            let mut writer = FastqWriter::create(&path).unwrap();
            let record = FastqRecord {
                name: "@r1".to_string(),
                seq: "ACGT".to_string(),
                qual: "IIII".to_string(),
            };
            writer.write_record(&record).unwrap();
            writer.finish().unwrap();

            let mut reader = FastqReader::open(&path).unwrap();
            assert_eq!(reader.next_record().unwrap().unwrap(), record);
            assert!(reader.next_record().unwrap().is_none());
        }
    }

    #[test]
    fn malformed_fastq_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("bad.fastq")).unwrap();
        std::fs::write(path.as_std_path(), "@r1\nACGT\n+\nII\n").unwrap();

        let mut reader = FastqReader::open(&path).unwrap();
        let err = reader.next_record().unwrap_err();
        assert!(matches!(err, AmpliflowError::MalformedRecord { .. }));
    }

    #[test]
    fn fasta_abundance_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("asv.fasta")).unwrap();
        let mut writer = FastaWriter::create(&path).unwrap();
        writer.write_sequence("asv1", 12, "ACGT").unwrap();
        writer.write_sequence("asv2", 3, "TTTT").unwrap();
        writer.finish().unwrap();

        let entries = read_fasta_abundances(&path).unwrap();
        assert_eq!(
            entries,
            vec![("ACGT".to_string(), 12), ("TTTT".to_string(), 3)]
        );
    }
}
