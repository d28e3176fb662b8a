use posthog_rs::Event;

fn capture_async(event: Event) {
    tokio::spawn(async move {
        if let Err(e) = posthog_rs::capture(event).await {
            tracing::error!("Failed to capture posthog event: {}", e);
        }
    });
}

pub fn track_update_published(
    version: &str,
    severity: &str,
    is_security_update: bool,
    file_size: i64,
) {
    let mut event = Event::new_anon("update_published");
    event.insert_prop("version", version).ok();
    event.insert_prop("severity", severity).ok();
    event.insert_prop("is_security_update", is_security_update).ok();
    event.insert_prop("file_size", file_size).ok();
    capture_async(event);
}

pub fn track_upload_failed(version: Option<&str>, error_kind: &str) {
    let mut event = Event::new_anon("upload_failed");
    if let Some(v) = version {
        event.insert_prop("version", v).ok();
    }
    event.insert_prop("error_kind", error_kind).ok();
    capture_async(event);
}

pub fn track_release_created(version: &str, is_mandatory: bool, clients_notified: usize) {
    let mut event = Event::new_anon("release_created");
    event.insert_prop("version", version).ok();
    event.insert_prop("is_mandatory", is_mandatory).ok();
    event.insert_prop("clients_notified", clients_notified).ok();
    capture_async(event);
}

pub fn track_artifact_download(version: &str, file_size: i64) {
    let mut event = Event::new_anon("artifact_download");
    event.insert_prop("version", version).ok();
    event.insert_prop("file_size", file_size).ok();
    capture_async(event);
}

pub fn track_download_failed(version: &str, error_kind: &str) {
    let mut event = Event::new_anon("download_failed");
    event.insert_prop("version", version).ok();
    event.insert_prop("error_kind", error_kind).ok();
    capture_async(event);
}
