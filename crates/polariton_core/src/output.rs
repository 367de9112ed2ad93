//! Tab-separated text output.

use crate::cavity::Cavity;
use std::io::{self, Write};

/// Writes one line per sample: time, then the flat state in codec order.
pub struct TrajectoryWriter<W: Write> {
    out: W,
    rows: usize,
}

impl<W: Write> TrajectoryWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, rows: 0 }
    }

    pub fn write_row(&mut self, time: f64, state: &[f64]) -> io::Result<()> {
        write!(self.out, "{time}")?;
        for v in state {
            write!(self.out, "\t{v}")?;
        }
        writeln!(self.out)?;
        self.rows += 1;
        Ok(())
    }

    pub fn record(&mut self, cavity: &Cavity) -> io::Result<()> {
        self.write_row(cavity.time(), cavity.state())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Writes the single sweep result line: the swept parameter, then the averages.
pub fn write_record<W: Write>(out: &mut W, parameter: f64, values: &[f64]) -> io::Result<()> {
    write!(out, "{parameter}")?;
    for v in values {
        write!(out, "\t{v}")?;
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::{write_record, TrajectoryWriter};

    #[test]
    fn trajectory_rows_lead_with_time() {
        let mut writer = TrajectoryWriter::new(Vec::new());
        writer.write_row(0.0, &[1.0, -0.5]).unwrap();
        writer.write_row(0.25, &[0.75, 2.0]).unwrap();
        assert_eq!(writer.rows(), 2);
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, "0\t1\t-0.5\n0.25\t0.75\t2\n");
    }

    #[test]
    fn record_line_is_tab_separated() {
        let mut buf = Vec::new();
        write_record(&mut buf, 7.5, &[0.125, 3.0]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "7.5\t0.125\t3\n");
    }
}
