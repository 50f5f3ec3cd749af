//! Launcher side of the control socket.

use std::{path::Path, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::{
   Result,
   domain::Domain,
   ipc::{self, CmdRequest, CmdResponse},
   usock,
};

/// Supplies the domain a launcher reports on `GetDomain`.
pub trait DomainSource: Send + Sync {
   fn domain(&self) -> Option<Domain>;
}

impl DomainSource for parking_lot::RwLock<Option<Domain>> {
   fn domain(&self) -> Option<Domain> {
      self.read().clone()
   }
}

/// Serves `Hello`, `GetDomain` and `Ping` on one control socket.
pub struct CmdServer {
   listener: usock::Listener,
}

impl CmdServer {
   pub async fn bind(path: &Path) -> Result<Self> {
      Ok(Self { listener: usock::Listener::bind(path).await? })
   }

   pub fn path(&self) -> &Path {
      self.listener.path()
   }

   /// Accepts clients until `cancel` fires or accepting fails. The socket
   /// file is removed on return.
   pub async fn serve(self, cancel: CancellationToken, source: Arc<dyn DomainSource>) -> Result<()> {
      loop {
         tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = self.listener.accept() => match result {
               Ok(stream) => {
                  let source = Arc::clone(&source);
                  tokio::spawn(handle_client(stream, source));
               },
               Err(e) => {
                  tracing::error!("control socket {} accept error: {e}", self.listener.local_addr());
                  return Err(e);
               },
            },
         }
      }
   }
}

async fn handle_client(mut stream: usock::Stream, source: Arc<dyn DomainSource>) {
   let mut buffer = ipc::SocketBuffer::new();

   loop {
      let request: CmdRequest = match buffer.recv(&mut stream).await {
         Ok(req) => req,
         Err(e) => {
            tracing::debug!("control client read error: {e}");
            break;
         },
      };

      let response = match request {
         CmdRequest::Hello { protocol_versions } => match ipc::negotiate_protocol(&protocol_versions) {
            Some(protocol_version) => CmdResponse::Hello { protocol_version },
            None => CmdResponse::Error {
               code:    "incompatible_version".to_string(),
               message: format!("no supported version in {protocol_versions:?}"),
            },
         },
         CmdRequest::GetDomain => CmdResponse::Domain { domain: source.domain() },
         CmdRequest::Ping => CmdResponse::Pong,
      };

      if let Err(e) = buffer.send(&mut stream, &response).await {
         tracing::debug!("control client write error: {e}");
         break;
      }
   }
}
