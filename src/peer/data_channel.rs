use std::sync::Arc;
use tracing::{debug, info};
use webrtc::data_channel::RTCDataChannel;

/// обработчик keepalive data-channel.
///
/// Канал нужен только как признак живости соединения: полезной нагрузки
/// по нему не передаётся, входящие сообщения лишь логируются.
pub fn attach_keepalive(dc: &Arc<RTCDataChannel>) {
    let label = dc.label().to_string();
    debug!("attach_keepalive called for channel {label}");

    dc.on_open(Box::new({
        let label = label.clone();
        move || {
            info!("keepalive channel {label} opened");
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let label = label.clone();
        move |msg| {
            debug!(
                "unexpected payload on keepalive channel {label}, length: {}",
                msg.data.len()
            );
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new(move || {
        info!("keepalive channel {label} closed");
        Box::pin(async {})
    }));
}
