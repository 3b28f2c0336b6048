use std::process::exit;

use crate::{
    capture::capture::CaptureSource,
    config::config::Config,
    coordinator::coordinator::Coordinator,
    worker::worker::{Frame, Worker},
};

pub mod capture;
pub mod config;
pub mod coordinator;
pub mod extract;
pub mod flow;
pub mod report;
pub mod worker;

#[tokio::main]
async fn main() -> anyhow::Result<()>{
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    let config = Config::new()?;
    let source = CaptureSource::open(&config.capture())?;
    let link = source.link_type();

    let reporter = config.format.reporter(config.window_secs, std::io::stdout());
    let coordinator = Coordinator::new(config.window(), config.workers * 2, reporter);
    let (frame_tx, frame_rx) = kanal::bounded::<Frame>(config.queue_depth);
    let frame_rx = frame_rx.to_async();

    let coordinator_handle = coordinator.client().downgrade();

    let mut jh_list = Vec::new();
    for id in 0..config.workers{
        let worker = Worker::new(id, link, frame_rx.clone(), coordinator.client(), config.flush_interval());
        let jh = tokio::spawn(async move{
            if let Err(e) = worker.run().await{
                log::error!("{:#}", e);
                exit(1);
            }
        });
        jh_list.push(jh);
    }
    drop(frame_rx);

    let jh = tokio::spawn(async move{
        coordinator.run().await;
    });
    jh_list.push(jh);

    let capture_jh = std::thread::Builder::new()
        .name("capture".into())
        .spawn(move || source.run(frame_tx))?;
    log::info!("started {} workers, reporting every {}s", config.workers, config.window_secs);

    tokio::select!{
        _ = futures::future::join_all(jh_list) => {
            // the workers only finish once the capture thread has returned
            match capture_jh.join(){
                Ok(result) => result?,
                Err(_) => return Err(anyhow::anyhow!("capture thread panicked")),
            }
            log::info!("capture drained, exiting");
        },
        res = tokio::signal::ctrl_c() => {
            res?;
            if let Some(client) = coordinator_handle.upgrade(){
                let open = client.snapshot().await?;
                let totals = open.totals();
                log::info!("interrupted, discarding open window: {} flows, {} packets, {} bytes", open.len(), totals.packets, totals.bytes);
            }
            log::info!("exiting");
        },
    }
    Ok(())
}
