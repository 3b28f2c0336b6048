use std::io::Write;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use crate::flow::flow::{FlowKey, FlowStats, FlowTable};

/// Receives the canonical table at each window boundary. Implementations
/// must not keep the table past the call.
pub trait Reporter: Send{
    fn report(&mut self, at: DateTime<Local>, table: &FlowTable) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat{
    #[default]
    Text,
    Yaml,
}

impl ReportFormat{
    pub fn reporter<W: Write + Send + 'static>(&self, window_secs: u64, out: W) -> Box<dyn Reporter>{
        match self{
            ReportFormat::Text => Box::new(TextReporter::new(window_secs, out)),
            ReportFormat::Yaml => Box::new(YamlReporter::new(out)),
        }
    }
}

pub struct TextReporter<W: Write>{
    window_secs: u64,
    out: W,
}

impl<W: Write> TextReporter<W>{
    pub fn new(window_secs: u64, out: W) -> TextReporter<W>{
        TextReporter{ window_secs, out }
    }
}

impl<W: Write + Send> Reporter for TextReporter<W>{
    fn report(&mut self, at: DateTime<Local>, table: &FlowTable) -> anyhow::Result<()>{
        writeln!(self.out, "Flow Stats ({} Seconds): {}", self.window_secs, at)?;
        for (key, stats) in table.sorted(){
            writeln!(self.out, "SrcIP: {}, SrcPort: {}, DstIP: {}, DstPort: {}, SrcBytes: {}, SrcPkts: {}",
                key.src_ip, key.src_port, key.dst_ip, key.dst_port, stats.bytes, stats.packets)?;
        }
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct WindowDocument{
    window_end: DateTime<Local>,
    flows: Vec<FlowEntry>,
}

#[derive(Serialize)]
struct FlowEntry{
    #[serde(flatten)]
    key: FlowKey,
    #[serde(flatten)]
    stats: FlowStats,
}

/// Writes one YAML document per window.
pub struct YamlReporter<W: Write>{
    out: W,
}

impl<W: Write> YamlReporter<W>{
    pub fn new(out: W) -> YamlReporter<W>{
        YamlReporter{ out }
    }
}

impl<W: Write + Send> Reporter for YamlReporter<W>{
    fn report(&mut self, at: DateTime<Local>, table: &FlowTable) -> anyhow::Result<()>{
        let doc = WindowDocument{
            window_end: at,
            flows: table.sorted().into_iter().map(|(key, stats)| FlowEntry{ key, stats }).collect(),
        };
        writeln!(self.out, "---")?;
        serde_yaml::to_writer(&mut self.out, &doc)?;
        self.out.flush()?;
        Ok(())
    }
}
