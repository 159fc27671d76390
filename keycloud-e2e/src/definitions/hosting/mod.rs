use super::{KeycloudInstruction, SegmentArgs};
use crate::errors::KeycloudStepError;
use crate::world::ScenarioWorld;

use async_trait::async_trait;

mod host_dir {
    use std::time::Duration;

    use actix_web::{App, HttpServer};
    use tokio::net::TcpStream;
    use tokio::time::sleep;

    use crate::errors::KeycloudInternalError;

    use super::*;

    async fn host(dir: &String, world: &mut ScenarioWorld) -> Result<(), KeycloudStepError> {
        let mut attempts = 0;
        let mut bound_port = None;
        while bound_port.is_none() && attempts < 5 {
            let port = world.ensure_port();
            let dir = world.resolve_file_path(dir);
            match HttpServer::new(move || {
                App::new().service(actix_files::Files::new("/", &dir).index_file("index.html"))
            })
            .bind(("127.0.0.1", port))
            {
                Ok(bound) => {
                    let server = bound.run();
                    let handle = server.handle();
                    world.handles.push(handle);
                    world.threads.push(tokio::task::spawn(async { server.await }));
                    bound_port = Some(port);
                }
                Err(_) => {
                    world.purge_port();
                    attempts += 1;
                }
            }
        }

        let Some(port) = bound_port else {
            return Err(KeycloudStepError::Internal(KeycloudInternalError::Custom {
                msg: format!("Could not bind a localhost port for {dir} after {attempts} attempts"),
            }));
        };

        // Scenarios addressed the configured origin until now; from here the
        // dashboard steps talk to the served directory instead.
        world.base_url = Some(format!("http://localhost:{port}/"));

        // Don't hand the port to the browser until it accepts connections.
        let mut checks = 0;
        while TcpStream::connect(("127.0.0.1", port)).await.is_err() {
            checks += 1;
            if checks >= 50 {
                return Err(KeycloudStepError::Internal(KeycloudInternalError::Custom {
                    msg: format!("The server on port {port} never started accepting connections"),
                }));
            }
            sleep(Duration::from_millis(100)).await;
        }

        Ok(())
    }

    pub struct HostDashboard;

    inventory::submit! {
        &HostDashboard as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for HostDashboard {
        fn segments(&self) -> &'static str {
            "I serve the dashboard from {dir}"
        }

        async fn run(
            &self,
            args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            let dir = args.get_string("dir")?;
            if dir.is_empty() {
                return Err(crate::errors::KeycloudInputError::ArgumentRequiresValue {
                    arg: "dir".to_string(),
                }
                .into());
            }

            host(&dir, world).await
        }
    }
}
