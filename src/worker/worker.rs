use crate::coordinator::coordinator::CoordinatorClient;
use crate::extract::extract::{extract, LinkType};
use crate::flow::flow::FlowTable;

/// One raw captured link-layer frame.
pub type Frame = Vec<u8>;

/// Drains a finite sequence of frames into a single local table.
pub fn aggregate<I, F>(link: LinkType, frames: I) -> FlowTable
where
    I: IntoIterator<Item = F>,
    F: AsRef<[u8]>,
{
    frames.into_iter().filter_map(|frame| extract(link, frame.as_ref())).collect()
}

/// Pulls frames from the shared queue and accumulates them locally.
/// The local table is handed to the coordinator every `flush_interval`
/// and once more when the queue closes.
pub struct Worker{
    id: usize,
    link: LinkType,
    frames: kanal::AsyncReceiver<Frame>,
    coordinator: CoordinatorClient,
    flush_interval: tokio::time::Duration,
    table: FlowTable,
    frames_seen: u64,
}

impl Worker{
    pub fn new(id: usize, link: LinkType, frames: kanal::AsyncReceiver<Frame>, coordinator: CoordinatorClient, flush_interval: tokio::time::Duration) -> Worker{
        Worker{
            id,
            link,
            frames,
            coordinator,
            flush_interval,
            table: FlowTable::new(),
            frames_seen: 0,
        }
    }
    pub async fn run(self) -> anyhow::Result<()>{
        let Worker{ id, link, frames, coordinator, flush_interval, mut table, mut frames_seen } = self;
        log::debug!("worker {} started", id);
        let start = tokio::time::Instant::now() + flush_interval;
        let mut flush = tokio::time::interval_at(start, flush_interval);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // kept alive across flush ticks so a frame in flight is never dropped
        let next = frames.recv();
        tokio::pin!(next);
        loop{
            tokio::select!{
                frame = &mut next => {
                    match frame{
                        Ok(frame) => {
                            frames_seen += 1;
                            if let Some(record) = extract(link, &frame){
                                table.record(record);
                            }
                            next.set(frames.recv());
                        },
                        Err(_) => break,
                    }
                },
                _ = flush.tick() => {
                    hand_off(id, &coordinator, &mut table).await?;
                },
            }
        }
        hand_off(id, &coordinator, &mut table).await?;
        log::debug!("worker {} finished after {} frames", id, frames_seen);
        Ok(())
    }
}

async fn hand_off(id: usize, coordinator: &CoordinatorClient, table: &mut FlowTable) -> anyhow::Result<()>{
    if table.is_empty(){
        return Ok(());
    }
    coordinator.merge(table.take()).await
        .map_err(|e| anyhow::anyhow!("worker {}: hand-off to coordinator failed: {}", id, e))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use tokio::time::Duration;
    use pretty_assertions::assert_eq;
    use super::*;
    use crate::coordinator::coordinator::testing::CollectingReporter;
    use crate::coordinator::coordinator::Coordinator;
    use crate::extract::extract::testing::{tcp_frame, udp_frame};
    use crate::flow::flow::{FlowKey, FlowStats};

    fn key(a: [u8; 4], sp: u16, b: [u8; 4], dp: u16) -> FlowKey {
        FlowKey::new(Ipv4Addr::from(a), sp, Ipv4Addr::from(b), dp)
    }

    /// A deterministic mix of flows and non-TCP noise.
    fn synthetic_stream() -> Vec<Frame> {
        let mut frames = Vec::new();
        for i in 0..300usize {
            let frame = match i % 4 {
                0 => tcp_frame([10, 0, 0, 1], 40000, [10, 0, 0, 9], 443, i % 17),
                1 => tcp_frame([10, 0, 0, 9], 443, [10, 0, 0, 1], 40000, i % 5),
                2 => tcp_frame([192, 168, 1, (i % 3) as u8], 22, [192, 168, 1, 100], 50000, 64),
                _ => udp_frame([10, 0, 0, 1], [10, 0, 0, 53], 30),
            };
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn single_flow_scenario() {
        let frames: Vec<Frame> = [10, 20, 30]
            .iter()
            .map(|len| tcp_frame([1, 2, 3, 4], 1111, [5, 6, 7, 8], 80, *len))
            .collect();
        let table = aggregate(LinkType::Ethernet, &frames);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&key([1, 2, 3, 4], 1111, [5, 6, 7, 8], 80)), Some(&FlowStats::new(60, 3)));
    }

    #[test]
    fn mixed_traffic_scenario() {
        let a = key([1, 2, 3, 4], 1111, [5, 6, 7, 8], 80);
        let b = key([9, 9, 9, 9], 2222, [5, 6, 7, 8], 443);
        let frames = vec![
            tcp_frame([1, 2, 3, 4], 1111, [5, 6, 7, 8], 80, 5),
            udp_frame([1, 2, 3, 4], [5, 6, 7, 8], 40),
            tcp_frame([9, 9, 9, 9], 2222, [5, 6, 7, 8], 443, 100),
            tcp_frame([1, 2, 3, 4], 1111, [5, 6, 7, 8], 80, 7),
        ];
        let table = aggregate(LinkType::Ethernet, &frames);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&a), Some(&FlowStats::new(12, 2)));
        assert_eq!(table.get(&b), Some(&FlowStats::new(100, 1)));
    }

    #[test]
    fn partitioned_stream_matches_single_worker() {
        let frames = synthetic_stream();
        let whole = aggregate(LinkType::Ethernet, &frames);

        for parts in [2usize, 3, 7] {
            let mut merged = FlowTable::new();
            for chunk in frames.chunks(frames.len() / parts + 1) {
                merged.merge(aggregate(LinkType::Ethernet, chunk));
            }
            assert_eq!(merged, whole, "{parts} partitions");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_sharing_a_queue_count_each_frame_once() {
        let frames = synthetic_stream();
        let expected = aggregate(LinkType::Ethernet, &frames);

        let reporter = CollectingReporter::default();
        let coordinator = Coordinator::new(Duration::from_secs(3600), 16, Box::new(reporter.clone()));
        let (tx, rx) = kanal::bounded_async::<Frame>(8);
        let mut handles = Vec::new();
        for id in 0..4 {
            let worker = Worker::new(id, LinkType::Ethernet, rx.clone(), coordinator.client(), Duration::from_millis(5));
            handles.push(tokio::spawn(worker.run()));
        }
        drop(rx);
        let coordinator_jh = tokio::spawn(coordinator.run());

        for frame in frames {
            tx.send(frame).await.unwrap();
        }
        drop(tx);

        for result in futures::future::join_all(handles).await {
            result.unwrap().unwrap();
        }
        coordinator_jh.await.unwrap();

        let mut total = FlowTable::new();
        for table in reporter.tables() {
            total.merge(table);
        }
        assert_eq!(total, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_flushes_while_stream_stays_open() {
        let reporter = CollectingReporter::default();
        let coordinator = Coordinator::new(Duration::from_secs(10), 16, Box::new(reporter.clone()));
        let client = coordinator.client();
        let (tx, rx) = kanal::bounded_async::<Frame>(8);
        let worker = Worker::new(0, LinkType::Ethernet, rx, coordinator.client(), Duration::from_millis(250));
        let worker_jh = tokio::spawn(worker.run());
        let coordinator_jh = tokio::spawn(coordinator.run());

        tx.send(tcp_frame([1, 2, 3, 4], 1111, [5, 6, 7, 8], 80, 42)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = client.snapshot().await.unwrap();
        assert_eq!(snapshot.get(&key([1, 2, 3, 4], 1111, [5, 6, 7, 8], 80)), Some(&FlowStats::new(42, 1)));

        drop(tx);
        worker_jh.await.unwrap().unwrap();
        drop(client);
        coordinator_jh.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn frames_land_in_the_window_they_arrive_in() {
        let flow = key([1, 2, 3, 4], 1111, [5, 6, 7, 8], 80);
        let reporter = CollectingReporter::default();
        let coordinator = Coordinator::new(Duration::from_secs(10), 16, Box::new(reporter.clone()));
        let (tx, rx) = kanal::bounded_async::<Frame>(8);
        let worker = Worker::new(0, LinkType::Ethernet, rx, coordinator.client(), Duration::from_millis(250));
        let worker_jh = tokio::spawn(worker.run());
        let coordinator_jh = tokio::spawn(coordinator.run());

        for t in 1..=9usize {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(tcp_frame([1, 2, 3, 4], 1111, [5, 6, 7, 8], 80, t)).await.unwrap();
            tx.send(udp_frame([1, 2, 3, 4], [5, 6, 7, 8], 500)).await.unwrap();
        }
        // crosses the t=10 boundary
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(reporter.tables().len(), 1);
        tx.send(tcp_frame([1, 2, 3, 4], 1111, [5, 6, 7, 8], 80, 100)).await.unwrap();

        drop(tx);
        worker_jh.await.unwrap().unwrap();
        coordinator_jh.await.unwrap();

        let tables = reporter.tables();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].len(), 1);
        assert_eq!(tables[0].get(&flow), Some(&FlowStats::new(45, 9)));
        assert_eq!(tables[1].len(), 1);
        assert_eq!(tables[1].get(&flow), Some(&FlowStats::new(100, 1)));
    }

    #[tokio::test]
    async fn hand_off_failure_is_reported() {
        let coordinator = Coordinator::new(Duration::from_secs(10), 1, Box::new(CollectingReporter::default()));
        let (tx, rx) = kanal::bounded_async::<Frame>(1);
        let worker = Worker::new(3, LinkType::Ethernet, rx, coordinator.client(), Duration::from_secs(60));
        drop(coordinator);

        tx.send(tcp_frame([1, 2, 3, 4], 1, [5, 6, 7, 8], 2, 1)).await.unwrap();
        drop(tx);
        let err = worker.run().await.unwrap_err();
        assert!(err.to_string().contains("worker 3"));
    }
}
