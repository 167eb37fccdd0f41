use std::error::Error;
use std::process::exit;
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info, warn, LevelFilter};
use tokio::sync::oneshot;
use tokio::time::sleep;
use tonic::transport::Server;
use tonic::Request;

use chord_ring::node::state::NodeState;
use chord_ring::threads::chord::chord_proto::chord_client::ChordClient;
use chord_ring::threads::chord::chord_proto::chord_server::ChordServer;
use chord_ring::threads::chord::chord_proto::{Empty, FILE_DESCRIPTOR_SET};
use chord_ring::threads::chord::{ChordService, ClientFactory};
use chord_ring::threads::join::{process_node_join, resolve_identities};
use chord_ring::threads::web;
use chord_ring::utils::cli::Cli;
use chord_ring::utils::config::Config;
use chord_ring::utils::constants::CONNECTION_RETRY_UPON_FAILURE_MILLIS;

#[derive(Clone, Copy)]
enum MaintenanceTask {
    Stabilize,
    FixFingers,
    CheckPredecessor,
}

impl MaintenanceTask {
    fn name(&self) -> &'static str {
        match self {
            MaintenanceTask::Stabilize => "stabilize",
            MaintenanceTask::FixFingers => "fix_fingers",
            MaintenanceTask::CheckPredecessor => "check_predecessor",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    simple_logger::SimpleLogger::new()
        .env()
        .with_level(LevelFilter::Debug)
        .init()
        .unwrap();

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            exit(1);
        }
    };
    let (own, known) = match resolve_identities(&config) {
        Ok(identities) => identities,
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    };
    let grpc_address = config.grpc_address();

    let mut thread_handles = Vec::new();

    let (tx_service, rx_service) = oneshot::channel();
    let (tx_web, rx_web) = oneshot::channel();

    info!("Starting up join thread as node {}", own);
    let join_config = config.clone();
    thread_handles.push(tokio::spawn(async move {
        let state = NodeState::new(own, join_config.hash_bits);
        let service = ChordService::new(state, ClientFactory::default(), join_config.debug);
        if let Err(e) = process_node_join(&service, known).await {
            error!("joining the ring failed: {}", e);
            exit(1);
        }
        let _ = tx_web.send(service.state().clone());
        if tx_service.send(service).is_err() {
            error!("gRPC thread went away before the join finished");
            exit(1);
        }
    }));

    let serve_address = grpc_address.clone();
    thread_handles.push(tokio::spawn(async move {
        let service = rx_service.await.unwrap();
        info!("Starting up gRPC service on {}", serve_address);

        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build()
            .unwrap();

        Server::builder()
            .add_service(ChordServer::new(service))
            .add_service(reflection_service)
            .serve(serve_address.parse().unwrap())
            .await
            .unwrap();
    }));

    if let Some(web_address) = config.web_address.clone() {
        info!("Starting up status page on {}", web_address);
        let web_config = config.clone();
        std::thread::spawn(move || {
            actix_web::rt::System::new().block_on(async move {
                if let Ok(state) = rx_web.await {
                    if let Err(e) = web::serve(web_address, web_config, state).await {
                        warn!("status page server failed: {}", e);
                    }
                }
            })
        });
    }

    let maintenance = [
        (MaintenanceTask::Stabilize, config.stabilize_interval_millis),
        (MaintenanceTask::FixFingers, config.fix_fingers_interval_millis),
        (
            MaintenanceTask::CheckPredecessor,
            config.check_predecessor_interval_millis,
        ),
    ];
    for (task, interval_millis) in maintenance {
        info!("Starting up periodic {} driver", task.name());
        let driver_address = grpc_address.clone();
        thread_handles.push(tokio::spawn(async move {
            run_maintenance_loop(driver_address, Duration::from_millis(interval_millis), task).await;
        }));
    }

    for handle in thread_handles {
        handle.await?;
    }

    Ok(())
}

/// Drives one periodic task by calling the node's own gRPC service, exactly
/// like a remote peer would. The connect retry also delays the first tick
/// until the join completed, since the service only starts serving then.
async fn run_maintenance_loop(grpc_address: String, interval: Duration, task: MaintenanceTask) {
    loop {
        match ChordClient::connect(format!("http://{}", grpc_address)).await {
            Ok(mut client) => loop {
                let result = match task {
                    MaintenanceTask::Stabilize => client.stabilize(Request::new(Empty {})).await,
                    MaintenanceTask::FixFingers => client.fix_fingers(Request::new(Empty {})).await,
                    MaintenanceTask::CheckPredecessor => {
                        client.check_predecessor(Request::new(Empty {})).await
                    }
                };
                if let Err(status) = result {
                    warn!("local {} call failed: {}", task.name(), status.message());
                    break;
                }
                sleep(interval).await;
            },
            Err(_) => {
                debug!(
                    "local gRPC service not reachable yet, retrying {} driver in {} millis",
                    task.name(),
                    CONNECTION_RETRY_UPON_FAILURE_MILLIS
                );
                sleep(Duration::from_millis(CONNECTION_RETRY_UPON_FAILURE_MILLIS)).await;
            }
        }
    }
}
