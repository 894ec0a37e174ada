//! WhatsApp side of the bridge

use async_trait::async_trait;
use zd_core::event::MediaInfo;
use zd_whatsapp::{ConnectionRegistry, SendReceipt, SendRequest};

/// Outbound WhatsApp operations the bridge needs from a session
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, session_id: &str, request: SendRequest)
    -> zd_whatsapp::Result<SendReceipt>;

    async fn download_media(
        &self,
        session_id: &str,
        media: &MediaInfo,
    ) -> zd_whatsapp::Result<Vec<u8>>;
}

#[async_trait]
impl MessageSender for ConnectionRegistry {
    async fn send(
        &self,
        session_id: &str,
        request: SendRequest,
    ) -> zd_whatsapp::Result<SendReceipt> {
        ConnectionRegistry::send(self, session_id, request).await
    }

    async fn download_media(
        &self,
        session_id: &str,
        media: &MediaInfo,
    ) -> zd_whatsapp::Result<Vec<u8>> {
        ConnectionRegistry::download_media(self, session_id, media).await
    }
}
