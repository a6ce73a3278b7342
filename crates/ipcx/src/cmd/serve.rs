use std::time::Duration;

use ipcx_envelope::{Arg, BoxError, RemoteError};
use ipcx_peer::{Endpoint, HandleContext, LinkListener, PeerConfig};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cmd::ServeArgs;
use crate::exit::{peer_error, CliResult, SUCCESS};

pub async fn run(args: ServeArgs) -> CliResult<i32> {
    let listener = LinkListener::bind(&args.path)
        .map_err(|err| peer_error("bind failed", err))?
        .with_config(PeerConfig::from_env());
    let tick = Duration::from_millis(args.tick_ms);
    info!(path = ?listener.path(), "serving demo handlers");

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept_with(|endpoint| register_demo_handlers(endpoint, tick)) => accepted,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; shutting down");
                return Ok(SUCCESS);
            }
        };
        let endpoint = accepted.map_err(|err| peer_error("accept failed", err))?;
        info!(peer = ?endpoint.peer(), "client connected");

        if args.once {
            tokio::select! {
                _ = endpoint.closed() => info!("client disconnected"),
                _ = tokio::signal::ctrl_c() => info!("interrupted; shutting down"),
            }
            return Ok(SUCCESS);
        }

        tokio::spawn(async move {
            endpoint.closed().await;
            info!(peer = ?endpoint.peer(), "client disconnected");
        });
    }
}

pub(crate) fn register_demo_handlers(endpoint: &Endpoint, tick: Duration) {
    endpoint.handle("echo", |_ctx: HandleContext, args: Vec<Arg>| async move {
        let value = match args.first() {
            Some(arg) => arg.to_plain()?,
            None => Value::Null,
        };
        Ok::<_, BoxError>(value)
    });

    endpoint.handle("countdown", move |_ctx: HandleContext, args: Vec<Arg>| async move {
        let request = args.first().cloned().unwrap_or_default();
        let from = request
            .get("from")
            .and_then(|from| from.as_i64())
            .filter(|from| (0..=1000).contains(from))
            .ok_or_else(|| bad_args("countdown expects {from: 0..=1000, on_tick?}"))?;
        let on_tick = request.get("on_tick");

        for n in (1..=from).rev() {
            match on_tick.as_ref().and_then(Arg::as_callback) {
                Some(on_tick) => on_tick.call(vec![Arg::from(n)])?,
                None => warn!(n, "countdown without on_tick"),
            }
            if !tick.is_zero() {
                tokio::time::sleep(tick).await;
            }
        }
        Ok::<_, BoxError>(json!("liftoff"))
    });

    endpoint.handle("fail", |_ctx: HandleContext, args: Vec<Arg>| async move {
        let message = args
            .first()
            .and_then(|arg| arg.as_str().map(str::to_string))
            .unwrap_or_else(|| "requested failure".to_string());
        Err::<Value, BoxError>(
            RemoteError::new(message)
                .with_name("DemoError")
                .with_code("DEMO_FAIL")
                .into(),
        )
    });
}

fn bad_args(message: &str) -> BoxError {
    RemoteError::new(message)
        .with_name("TypeError")
        .with_code("DEMO_BAD_ARGS")
        .into()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use ipcx_peer::Link;

    use super::*;

    fn demo_pair() -> (Endpoint, Endpoint) {
        let (left, right) = Link::pair();
        let server = Endpoint::with_setup(right, PeerConfig::default(), |endpoint| {
            register_demo_handlers(endpoint, Duration::ZERO)
        });
        (Endpoint::new(left, PeerConfig::default()), server)
    }

    #[tokio::test]
    async fn countdown_ticks_then_lifts_off() {
        let (client, _server) = demo_pair();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let on_tick = Arg::function(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let result = client
            .invoke(
                "countdown",
                vec![Arg::map([("from", Arg::from(3)), ("on_tick", on_tick)])],
            )
            .await
            .expect("countdown should succeed");
        assert_eq!(result, json!("liftoff"));
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn echo_and_fail() {
        let (client, _server) = demo_pair();
        let echoed = client
            .invoke("echo", vec![Arg::from(json!({"a": [1, 2]}))])
            .await
            .unwrap();
        assert_eq!(echoed, json!({"a": [1, 2]}));

        let err = client
            .invoke("fail", vec![Arg::from("nope")])
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("DEMO_FAIL"));
        assert_eq!(err.to_string(), "DemoError: nope");
    }

    #[tokio::test]
    async fn countdown_rejects_bad_arguments() {
        let (client, _server) = demo_pair();
        let err = client
            .invoke("countdown", vec![Arg::map([("from", Arg::from("x"))])])
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("DEMO_BAD_ARGS"));
    }
}
