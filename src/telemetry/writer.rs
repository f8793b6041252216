use std::fs::{self, File};
use std::io::Write;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::types::TelemetryEvent;

struct CsvWriter {
    file: File,
}

impl CsvWriter {
    fn create(path: &str, header: &str) -> std::io::Result<Self> {
        let mut file = File::create(path)?;
        writeln!(file, "{}", header)?;
        Ok(Self { file })
    }
}

/// Single background task that owns all telemetry I/O: orders, fills, risk
/// events, and latency samples land in CSVs under logs/. Nothing here runs
/// on the quoting task; the engine uses try_send and drops records rather
/// than block.
pub async fn telemetry_writer(mut rx: mpsc::Receiver<TelemetryEvent>) {
    let dir = format!(
        "logs/{}",
        chrono::Utc::now().format("%Y%m%d-%H%M%S")
    );
    if let Err(e) = fs::create_dir_all(&dir) {
        warn!(error = %e, %dir, "telemetry disabled: cannot create log dir");
        while rx.recv().await.is_some() {}
        return;
    }

    let orders = CsvWriter::create(
        &format!("{}/orders.csv", dir),
        "ts_ms,internal_id,ticker,side,price,count",
    );
    let fills = CsvWriter::create(
        &format!("{}/fills.csv", dir),
        "ts_ms,order_id,ticker,side,action,count,price,realized_pnl",
    );
    let risk = CsvWriter::create(&format!("{}/risk.csv", dir), "ts_ms,event,detail");
    let latency = CsvWriter::create(&format!("{}/latency.csv", dir), "ts_ms,event,latency_us");
    let (mut orders, mut fills, mut risk, mut latency) = match (orders, fills, risk, latency) {
        (Ok(o), Ok(f), Ok(r), Ok(l)) => (o, f, r, l),
        _ => {
            warn!("telemetry disabled: cannot open csv files");
            while rx.recv().await.is_some() {}
            return;
        }
    };

    info!(%dir, "telemetry writer started");
    while let Some(event) = rx.recv().await {
        match event {
            TelemetryEvent::OrderSent(o) => {
                writeln!(
                    orders.file,
                    "{},{},{},{},{},{}",
                    o.ts_ms,
                    o.internal_id,
                    o.ticker,
                    o.quote_side.as_str(),
                    o.price,
                    o.count,
                )
                .ok();
            }
            TelemetryEvent::Fill(f) => {
                writeln!(
                    fills.file,
                    "{},{},{},{},{},{},{},{:.2}",
                    f.ts_ms,
                    f.order_id,
                    f.ticker,
                    f.side.as_str(),
                    f.action.as_str(),
                    f.count,
                    f.price,
                    f.realized_pnl,
                )
                .ok();
            }
            TelemetryEvent::Risk(r) => {
                writeln!(risk.file, "{},{},{}", r.ts_ms, r.event, r.detail).ok();
                risk.file.flush().ok();
            }
            TelemetryEvent::Latency(l) => {
                writeln!(latency.file, "{},{},{}", l.ts_ms, l.event, l.latency_us).ok();
            }
        }
    }
    info!("telemetry writer stopped");
}
