pub mod results;
pub mod server;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::DispatcherConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::error::Result;
use crate::scheduler::{AssignmentEngine, HeartbeatEvictor, Redistributor, SchedulerState};

pub use results::ResultStore;
pub use server::DispatcherServer;

/// The central coordinator: owns the registry and ledger and runs the
/// heartbeat and redistribution loops next to the request server.
pub struct Dispatcher {
    pub config: DispatcherConfig,
    pub state: SchedulerState,
    pub results: ResultStore,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            results: ResultStore::new(config.results_dir.clone()),
            state: SchedulerState::new(),
            config,
        }
    }

    /// Bind the configured address and serve until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Fails if the listen address cannot be bound.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Serve on an already bound listener.
    ///
    /// 1. Spawns the heartbeat evictor
    /// 2. Spawns the redistributor
    /// 3. Optionally spawns the status dashboard
    /// 4. Runs the request server until shutdown
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "Dispatcher listening");
        }

        let evictor = HeartbeatEvictor::new(
            self.state.clone(),
            self.config.heartbeat_interval(),
            self.config.probe_timeout(),
        );
        let evictor_shutdown = shutdown.clone();
        let evictor_handle = tokio::spawn(async move {
            evictor.run(evictor_shutdown).await;
        });

        let engine = AssignmentEngine::new(
            self.state.clone(),
            self.config.request_timeout(),
            self.config.dispatch_backoff(),
        );
        let redistributor = Redistributor::new(
            self.state.clone(),
            engine,
            self.config.redistribute_interval(),
        );
        let redistributor_shutdown = shutdown.clone();
        let redistributor_handle = tokio::spawn(async move {
            redistributor.run(redistributor_shutdown).await;
        });

        if let Some(port) = self.config.dashboard_port {
            let addr = format!("{}:{}", self.config.host, port);
            let dashboard_state = DashboardState {
                state: self.state.clone(),
            };
            let dashboard_shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_dashboard(addr, dashboard_state, dashboard_shutdown).await;
            });
        }

        let server = DispatcherServer::new(
            listener,
            self.state.clone(),
            self.results.clone(),
            self.config.read_timeout(),
        );
        server.run(shutdown).await;

        let _ = evictor_handle.await;
        let _ = redistributor_handle.await;
        tracing::info!("Dispatcher shut down");
    }
}
