use mongodb::{bson::doc, Database};
use rocket::{
    response::stream::{Event, EventStream},
    serde::json::{json, Json, Value},
    Route, Shutdown, State,
};
use tokio::{select, sync::broadcast::error::RecvError};

use crate::election::ElectionLifecycle;
use crate::error::Result;
use crate::events::Notifier;
use crate::model::election::ElectionStatus;

pub fn routes() -> Vec<Route> {
    routes![election_status, events, health]
}

#[get("/election/status")]
async fn election_status(lifecycle: &State<ElectionLifecycle>) -> Result<Json<ElectionStatus>> {
    Ok(Json(lifecycle.status().await?))
}

/// Stream notifications as server-sent events until the client goes away
/// or the server shuts down.
#[get("/events")]
fn events(notifier: &State<Notifier>, mut shutdown: Shutdown) -> EventStream![] {
    let mut receiver = notifier.subscribe();
    EventStream! {
        loop {
            let notification = select! {
                received = receiver.recv() => match received {
                    Ok(notification) => notification,
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event subscriber lagged, skipped {skipped} notification(s)");
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };
            yield Event::json(&notification).event(notification.name());
        }
    }
}

#[get("/health")]
async fn health(db: &State<Database>) -> Result<Json<Value>> {
    db.run_command(doc! {"ping": 1}, None).await?;
    Ok(Json(json!({"status": "ok"})))
}
