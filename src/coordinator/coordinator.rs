use byte_unit::{Byte, UnitType};
use chrono::Local;
use crate::flow::flow::FlowTable;
use crate::report::report::Reporter;

/// Owns the canonical table. Workers reach it only through a
/// `CoordinatorClient`; every mutation happens inside `run`.
pub struct Coordinator{
    window: tokio::time::Duration,
    command_tx: tokio::sync::mpsc::Sender<CoordinatorCommand>,
    command_rx: tokio::sync::mpsc::Receiver<CoordinatorCommand>,
    canonical: CanonicalTable,
}

impl Coordinator{
    pub fn new(window: tokio::time::Duration, mailbox_size: usize, reporter: Box<dyn Reporter>) -> Coordinator{
        let (tx, rx) = tokio::sync::mpsc::channel(mailbox_size);
        Coordinator{
            window,
            command_tx: tx,
            command_rx: rx,
            canonical: CanonicalTable{
                table: FlowTable::new(),
                reporter,
                windows_reported: 0,
            },
        }
    }
    pub fn client(&self) -> CoordinatorClient{
        CoordinatorClient{command_tx: self.command_tx.clone()}
    }
    pub async fn run(self){
        let Coordinator{ window, command_tx, mut command_rx, mut canonical } = self;
        // only clients may keep the mailbox open
        drop(command_tx);
        let start = tokio::time::Instant::now() + window;
        let mut interval = tokio::time::interval_at(start, window);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop{
            tokio::select!{
                command = command_rx.recv() => {
                    match command{
                        Some(CoordinatorCommand::Merge(local)) => {
                            canonical.merge(local);
                        },
                        Some(CoordinatorCommand::Snapshot(resp_tx)) => {
                            if resp_tx.send(canonical.table.clone()).is_err(){
                                log::debug!("snapshot requester went away");
                            }
                        },
                        None => {
                            log::info!("all workers finished, reporting partial window");
                            canonical.on_window_elapsed();
                            break;
                        },
                    }
                },
                _ = interval.tick() => {
                    canonical.on_window_elapsed();
                },
            }
        }
    }
}

struct CanonicalTable{
    table: FlowTable,
    reporter: Box<dyn Reporter>,
    windows_reported: u64,
}

impl CanonicalTable{
    fn merge(&mut self, local: FlowTable){
        self.table.merge(local);
    }
    /// Hands the finished window to the reporter and starts the next one
    /// from an empty table.
    fn on_window_elapsed(&mut self){
        let at = Local::now();
        let snapshot = self.table.take();
        let totals = snapshot.totals();
        self.windows_reported += 1;
        let bytes = Byte::from_u64(totals.bytes).get_appropriate_unit(UnitType::Decimal);
        log::info!("window {} closed: {} flows, {} packets, {:.2}", self.windows_reported, snapshot.len(), totals.packets, bytes);
        if let Err(e) = self.reporter.report(at, &snapshot){
            log::error!("failed to write report for window {}: {:#}", self.windows_reported, e);
        }
    }
}

pub enum CoordinatorCommand{
    Merge(FlowTable),
    Snapshot(tokio::sync::oneshot::Sender<FlowTable>),
}

#[derive(Clone)]
pub struct CoordinatorClient{
    command_tx: tokio::sync::mpsc::Sender<CoordinatorCommand>,
}

impl CoordinatorClient{
    /// Transfers a local table to the coordinator. Fails only if the
    /// coordinator has stopped.
    pub async fn merge(&self, local: FlowTable) -> anyhow::Result<()>{
        self.command_tx.send(CoordinatorCommand::Merge(local)).await
            .map_err(|_| anyhow::anyhow!("coordinator mailbox closed"))
    }
    pub async fn snapshot(&self) -> anyhow::Result<FlowTable>{
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.command_tx.send(CoordinatorCommand::Snapshot(tx)).await
            .map_err(|_| anyhow::anyhow!("coordinator mailbox closed"))?;
        Ok(rx.await?)
    }
    /// A handle that does not keep the coordinator's mailbox open.
    pub fn downgrade(&self) -> WeakCoordinatorClient{
        WeakCoordinatorClient{command_tx: self.command_tx.downgrade()}
    }
}

pub struct WeakCoordinatorClient{
    command_tx: tokio::sync::mpsc::WeakSender<CoordinatorCommand>,
}

impl WeakCoordinatorClient{
    pub fn upgrade(&self) -> Option<CoordinatorClient>{
        self.command_tx.upgrade().map(|command_tx| CoordinatorClient{command_tx})
    }
}
