use super::protocol::{
    self, command, errno, option, reply, ClientFlags, HandshakeFlags, OptionHeader, OptionReply,
    Reply, Request, TransmissionFlags,
};
use super::ProtocolError;
use crate::config::ServerConfig;
use crate::errors::{Error, ErrorKind};
use crate::image::Image;
use crate::storage::Storage;
use byteorder::{NetworkEndian, WriteBytesExt};
use parking_lot::Mutex;
use slog::Logger;
use std::fs::File;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use zerocopy::AsBytes;

pub type SharedImage<S = File> = Arc<Mutex<Image<S>>>;

/// The export a client selected during negotiation
#[derive(Debug, Clone)]
struct Export {
    name: String,
    size: u64,
}

/// Accepts clients until the listener fails
pub async fn serve<S>(
    image: SharedImage<S>,
    config: ServerConfig,
    logger: Logger,
) -> Result<(), ProtocolError>
where
    S: Storage + Send + 'static,
{
    let listener = TcpListener::bind(config.listen).await?;
    slog::info!(logger, "Listening";
        "addr" => %config.listen,
        "read_only" => config.read_only
    );

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let logger = logger.new(slog::o!("peer" => peer.to_string()));
                let image = Arc::clone(&image);
                tokio::spawn(async move {
                    slog::info!(logger, "Accepted connection");
                    match serve_connection(stream, image, config, &logger).await {
                        Ok(()) => slog::info!(logger, "Connection closed"),
                        Err(e) => slog::error!(logger, "Connection failed"; "error" => %e),
                    }
                });
            }
            Err(e) => {
                slog::error!(logger, "Unable to accept connection"; "error" => %e);
            }
        }
    }
}

/// Negotiates an export with one client, then answers its requests until it disconnects
pub async fn serve_connection<IO, S>(
    mut io: IO,
    image: SharedImage<S>,
    config: ServerConfig,
    logger: &Logger,
) -> Result<(), ProtocolError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    S: Storage + Send + 'static,
{
    let export = match negotiate(&mut io, &image, &config, logger).await? {
        Some(export) => export,
        None => return Ok(()),
    };
    let logger = logger.new(slog::o!("export" => export.name.clone()));
    transmit(&mut io, &image, &export, &config, &logger).await
}

async fn negotiate<IO, S>(
    io: &mut IO,
    image: &SharedImage<S>,
    config: &ServerConfig,
    logger: &Logger,
) -> Result<Option<Export>, ProtocolError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    S: Storage + Send + 'static,
{
    let mut greeting = Vec::with_capacity(18);
    WriteBytesExt::write_u64::<NetworkEndian>(&mut greeting, protocol::NBDMAGIC)?;
    WriteBytesExt::write_u64::<NetworkEndian>(&mut greeting, protocol::IHAVEOPT)?;
    WriteBytesExt::write_u16::<NetworkEndian>(&mut greeting, 
        (HandshakeFlags::FIXED_NEWSTYLE | HandshakeFlags::NO_ZEROES).bits(),
    )?;
    io.write_all(&greeting).await?;
    io.flush().await?;

    let client = ClientFlags::from_bits_truncate(io.read_u32().await?);
    if !client.contains(ClientFlags::FIXED_NEWSTYLE) {
        return Err(ProtocolError::NotFixedNewstyle);
    }
    slog::debug!(logger, "Client flags"; "flags" => ?client);

    loop {
        let mut buf = [0; protocol::OPTION_HEADER_SIZE];
        io.read_exact(&mut buf).await?;
        let header = OptionHeader::read(&buf).ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        if header.magic.get() != protocol::IHAVEOPT {
            return Err(ProtocolError::BadMagic {
                what: "option",
                actual: header.magic.get(),
            });
        }
        let length = header.length.get();
        if length > protocol::MAX_OPTION_LENGTH {
            return Err(ProtocolError::OptionTooLarge(length));
        }
        let mut data = vec![0; length as usize];
        io.read_exact(&mut data).await?;

        match header.option.get() {
            option::EXPORT_NAME => {
                let name = String::from_utf8_lossy(&data).into_owned();
                let lookup = name.clone();
                let size = blocking(image, move |image| image.partition_size(&lookup).ok()).await?;
                let size = size.ok_or_else(|| ProtocolError::UnknownExport(name.clone()))?;

                let mut flags = TransmissionFlags::HAS_FLAGS | TransmissionFlags::SEND_FLUSH;
                if config.read_only {
                    flags |= TransmissionFlags::READ_ONLY;
                }
                let mut info = Vec::with_capacity(10 + protocol::ZERO_PAD);
                WriteBytesExt::write_u64::<NetworkEndian>(&mut info, size)?;
                WriteBytesExt::write_u16::<NetworkEndian>(&mut info, flags.bits())?;
                if !client.contains(ClientFlags::NO_ZEROES) {
                    info.resize(info.len() + protocol::ZERO_PAD, 0);
                }
                io.write_all(&info).await?;
                io.flush().await?;
                slog::info!(logger, "Selected export"; "export" => &name, "size" => size);
                return Ok(Some(Export { name, size }));
            }
            option::LIST => {
                let names: Vec<String> =
                    blocking(image, |image| image.partitions().keys().cloned().collect()).await?;
                for name in names {
                    let mut payload = Vec::with_capacity(4 + name.len());
                    WriteBytesExt::write_u32::<NetworkEndian>(&mut payload, name.len() as u32)?;
                    payload.extend_from_slice(name.as_bytes());
                    send_option_reply(io, option::LIST, reply::SERVER, &payload).await?;
                }
                send_option_reply(io, option::LIST, reply::ACK, &[]).await?;
            }
            option::ABORT => {
                send_option_reply(io, option::ABORT, reply::ACK, &[]).await?;
                slog::info!(logger, "Client aborted negotiation");
                return Ok(None);
            }
            other => {
                slog::debug!(logger, "Unsupported option"; "option" => other);
                send_option_reply(io, other, reply::ERR_UNSUP, &[]).await?;
            }
        }
    }
}

async fn send_option_reply<IO>(io: &mut IO, option: u32, reply_type: u32, data: &[u8]) -> io::Result<()>
where
    IO: AsyncWrite + Unpin,
{
    let header = OptionReply::new(option, reply_type, data.len() as u32);
    io.write_all(header.as_bytes()).await?;
    io.write_all(data).await?;
    io.flush().await
}

async fn transmit<IO, S>(
    io: &mut IO,
    image: &SharedImage<S>,
    export: &Export,
    config: &ServerConfig,
    logger: &Logger,
) -> Result<(), ProtocolError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    S: Storage + Send + 'static,
{
    loop {
        let mut buf = [0; protocol::REQUEST_SIZE];
        match io.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                slog::info!(logger, "Client hung up without disconnecting");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        let request = Request::read(&buf).ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        if request.magic.get() != protocol::REQUEST_MAGIC {
            return Err(ProtocolError::BadMagic {
                what: "request",
                actual: u64::from(request.magic.get()),
            });
        }
        let handle = request.handle.get();
        let offset = request.offset.get();
        let length = request.length.get();
        slog::trace!(logger, "Request";
            "kind" => request.kind.get(),
            "offset" => offset,
            "length" => length
        );

        match request.kind.get() {
            command::READ => {
                if length > protocol::MAX_REQUEST_LENGTH {
                    send_reply(io, errno::EINVAL, handle, &[]).await?;
                    continue;
                }
                let name = export.name.clone();
                let result = blocking(image, move |image| image.read(&name, offset, length)).await?;
                match result {
                    Ok(data) => send_reply(io, 0, handle, &data).await?,
                    Err(e) => {
                        slog::warn!(logger, "Read failed"; "offset" => offset, "length" => length, "error" => %e);
                        send_reply(io, error_code(&e), handle, &[]).await?;
                    }
                }
            }
            command::WRITE => {
                if length > protocol::MAX_REQUEST_LENGTH {
                    return Err(ProtocolError::RequestTooLarge(length));
                }
                let mut data = vec![0; length as usize];
                io.read_exact(&mut data).await?;
                if config.read_only {
                    send_reply(io, errno::EPERM, handle, &[]).await?;
                    continue;
                }
                let name = export.name.clone();
                let result = blocking(image, move |image| image.write(&name, offset, &data)).await?;
                if let Err(e) = &result {
                    slog::warn!(logger, "Write failed"; "offset" => offset, "length" => length, "error" => %e);
                }
                let code = result.err().map_or(0, |e| error_code(&e));
                send_reply(io, code, handle, &[]).await?;
            }
            command::FLUSH => {
                let result = blocking(image, |image| image.sync()).await?;
                if let Err(e) = &result {
                    slog::warn!(logger, "Flush failed"; "error" => %e);
                }
                let code = result.err().map_or(0, |e| error_code(&e));
                send_reply(io, code, handle, &[]).await?;
            }
            command::DISC => {
                slog::info!(logger, "Client disconnected"; "size" => export.size);
                return Ok(());
            }
            other => {
                slog::debug!(logger, "Unsupported command"; "kind" => other);
                send_reply(io, errno::EINVAL, handle, &[]).await?;
            }
        }
    }
}

async fn send_reply<IO>(io: &mut IO, error: u32, handle: u64, data: &[u8]) -> io::Result<()>
where
    IO: AsyncWrite + Unpin,
{
    let reply = Reply::new(error, handle);
    io.write_all(reply.as_bytes()).await?;
    if error == 0 {
        io.write_all(data).await?;
    }
    io.flush().await
}

/// Runs `f` with the image locked, on the blocking thread pool
async fn blocking<S, T, F>(image: &SharedImage<S>, f: F) -> Result<T, ProtocolError>
where
    S: Storage + Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut Image<S>) -> T + Send + 'static,
{
    let image = Arc::clone(image);
    let result = tokio::task::spawn_blocking(move || {
        let mut image = image.lock();
        f(&mut image)
    })
    .await?;
    Ok(result)
}

/// Error value of a simple reply for a failed image operation
pub(crate) fn error_code(error: &Error) -> u32 {
    match error.kind() {
        ErrorKind::NotFound | ErrorKind::Range | ErrorKind::Unsupported => errno::EINVAL,
        ErrorKind::Allocation => errno::ENOSPC,
        ErrorKind::Format | ErrorKind::Io => errno::EIO,
    }
}
