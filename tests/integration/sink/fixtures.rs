//! In-process fake memcached server.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;

use crossbeam::channel::{Receiver, Sender};

pub const RES_MAGIC: u8 = 0x81;

#[derive(Clone, Debug)]
pub struct ReceivedFrame {
    /// Accept order of the connection the frame arrived on.
    pub conn_id: usize,
    pub opcode: u8,
    pub vbucket_id: u16,
    pub opaque: u32,
    pub key: Vec<u8>,
    pub extras: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct Reply {
    pub status: u16,
    pub opaque: u32,
    pub value: Vec<u8>,
}

impl Reply {
    pub fn status(frame: &ReceivedFrame, status: u16) -> Self {
        Self {
            status,
            opaque: frame.opaque,
            value: Vec::new(),
        }
    }
}

/// Serves every accepted connection with `respond`, reporting each frame.
pub fn spawn_server<F>(respond: F) -> (SocketAddr, Receiver<ReceivedFrame>)
where
    F: FnMut(&ReceivedFrame) -> Reply + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tx, rx) = crossbeam::channel::unbounded();

    thread::spawn(move || {
        let mut respond = respond;
        for (conn_id, stream) in listener.incoming().enumerate() {
            let Ok(stream) = stream else { return };
            serve(conn_id, stream, &mut respond, &tx);
        }
    });

    (addr, rx)
}

/// Replies with `statuses` in order, then success.
pub fn scripted(statuses: Vec<u16>) -> impl FnMut(&ReceivedFrame) -> Reply + Send + 'static {
    let mut statuses = statuses.into_iter();
    move |frame| Reply::status(frame, statuses.next().unwrap_or(0))
}

fn serve<F>(conn_id: usize, mut stream: TcpStream, respond: &mut F, tx: &Sender<ReceivedFrame>)
where
    F: FnMut(&ReceivedFrame) -> Reply,
{
    loop {
        let mut header = [0u8; 24];
        if stream.read_exact(&mut header).is_err() {
            return;
        }
        let key_len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let extras_len = header[4] as usize;
        let body_len =
            u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let mut body = vec![0u8; body_len];
        if stream.read_exact(&mut body).is_err() {
            return;
        }

        let frame = ReceivedFrame {
            conn_id,
            opcode: header[1],
            vbucket_id: u16::from_be_bytes([header[6], header[7]]),
            opaque: u32::from_be_bytes([header[12], header[13], header[14], header[15]]),
            extras: body[..extras_len].to_vec(),
            key: body[extras_len..extras_len + key_len].to_vec(),
            value: body[extras_len + key_len..].to_vec(),
        };
        let reply = respond(&frame);
        let _ = tx.send(frame.clone());
        if stream
            .write_all(&response_bytes(frame.opcode, &reply))
            .is_err()
        {
            return;
        }
    }
}

pub fn response_bytes(opcode: u8, reply: &Reply) -> Vec<u8> {
    let mut out = vec![RES_MAGIC, opcode, 0, 0, 0, 0];
    out.extend_from_slice(&reply.status.to_be_bytes());
    out.extend_from_slice(&(reply.value.len() as u32).to_be_bytes());
    out.extend_from_slice(&reply.opaque.to_be_bytes());
    out.extend_from_slice(&0u64.to_be_bytes());
    out.extend_from_slice(&reply.value);
    out
}
