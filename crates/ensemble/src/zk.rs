//! Minimal ZooKeeper wire client: session handshake, `getChildren` and
//! `getData`. Read-only, no watches; just enough to back the znode
//! explorer.
//!
//! Framing is 4-byte big-endian length prefixes; payloads use jute
//! primitives (big-endian ints, length-prefixed buffers and strings).

use std::io::{Cursor, Read};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::Error;

const OP_GET_DATA: i32 = 4;
const OP_GET_CHILDREN: i32 = 8;
const OP_CLOSE_SESSION: i32 = -11;
const SESSION_TIMEOUT_MS: i32 = 10_000;
const MAX_FRAME: u32 = 8 * 1024 * 1024;

/// Znode metadata, as returned by `getData`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stat {
    /// Zxid that created the node.
    pub czxid: i64,
    /// Zxid that last modified the node.
    pub mzxid: i64,
    /// Creation time, ms since the epoch.
    pub ctime: i64,
    /// Last-modified time, ms since the epoch.
    pub mtime: i64,
    /// Data version.
    pub version: i32,
    /// Children version.
    pub cversion: i32,
    /// ACL version.
    pub aversion: i32,
    /// Session id of the owner for ephemeral nodes, zero otherwise.
    pub ephemeral_owner: i64,
    /// Data length in bytes.
    pub data_length: i32,
    /// Number of children.
    pub num_children: i32,
    /// Zxid that last modified the children.
    pub pzxid: i64,
}

/// Data and metadata of one znode.
#[derive(Clone, Debug)]
pub struct NodeData {
    /// Node payload.
    pub data: Vec<u8>,
    /// Node metadata.
    pub stat: Stat,
}

fn write_ustring(buf: &mut Vec<u8>, value: &str) {
    let _ = buf.write_i32::<BigEndian>(value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

fn read_ustring(cursor: &mut Cursor<&[u8]>) -> Result<String, Error> {
    let len = cursor
        .read_i32::<BigEndian>()
        .map_err(|_| Error::Protocol("short string length"))?;
    if len < 0 {
        return Ok(String::new());
    }
    let mut buf = vec![0u8; len as usize];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| Error::Protocol("short string body"))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn read_buffer(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>, Error> {
    let len = cursor
        .read_i32::<BigEndian>()
        .map_err(|_| Error::Protocol("short buffer length"))?;
    if len < 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; len as usize];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| Error::Protocol("short buffer body"))?;
    Ok(buf)
}

pub(crate) fn read_stat(cursor: &mut Cursor<&[u8]>) -> Result<Stat, Error> {
    let next_i64 =
        |cursor: &mut Cursor<&[u8]>| cursor.read_i64::<BigEndian>().map_err(|_| Error::Protocol("short stat"));
    let czxid = next_i64(cursor)?;
    let mzxid = next_i64(cursor)?;
    let ctime = next_i64(cursor)?;
    let mtime = next_i64(cursor)?;
    let version = cursor.read_i32::<BigEndian>().map_err(|_| Error::Protocol("short stat"))?;
    let cversion = cursor.read_i32::<BigEndian>().map_err(|_| Error::Protocol("short stat"))?;
    let aversion = cursor.read_i32::<BigEndian>().map_err(|_| Error::Protocol("short stat"))?;
    let ephemeral_owner = next_i64(cursor)?;
    let data_length = cursor.read_i32::<BigEndian>().map_err(|_| Error::Protocol("short stat"))?;
    let num_children = cursor.read_i32::<BigEndian>().map_err(|_| Error::Protocol("short stat"))?;
    let pzxid = next_i64(cursor)?;

    Ok(Stat {
        czxid,
        mzxid,
        ctime,
        mtime,
        version,
        cversion,
        aversion,
        ephemeral_owner,
        data_length,
        num_children,
        pzxid,
    })
}

struct Session {
    stream: TcpStream,
    deadline: Duration,
    xid: i32,
}

impl Session {
    async fn connect(host: &str, port: u16, deadline: Duration) -> Result<Self, Error> {
        let stream = timeout(deadline, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::Timeout("zookeeper connect"))?
            .map_err(|e| Error::Io("error connecting to zookeeper", e))?;

        let mut session = Self {
            stream,
            deadline,
            xid: 0,
        };

        let mut body = Vec::new();
        let _ = body.write_i32::<BigEndian>(0); // protocol version
        let _ = body.write_i64::<BigEndian>(0); // last zxid seen
        let _ = body.write_i32::<BigEndian>(SESSION_TIMEOUT_MS);
        let _ = body.write_i64::<BigEndian>(0); // session id
        let _ = body.write_i32::<BigEndian>(16); // password
        body.extend_from_slice(&[0u8; 16]);

        session.send_frame(&body).await?;
        session.read_frame().await?; // ConnectResponse, contents unused
        Ok(session)
    }

    async fn send_frame(&mut self, body: &[u8]) -> Result<(), Error> {
        use tokio::io::AsyncWriteExt;
        let mut frame = Vec::with_capacity(body.len() + 4);
        let _ = WriteBytesExt::write_u32::<BigEndian>(&mut frame, body.len() as u32);
        frame.extend_from_slice(body);
        timeout(self.deadline, self.stream.write_all(&frame))
            .await
            .map_err(|_| Error::Timeout("zookeeper send"))?
            .map_err(|e| Error::Io("error sending to zookeeper", e))
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, Error> {
        use tokio::io::AsyncReadExt;
        let len = timeout(self.deadline, self.stream.read_u32())
            .await
            .map_err(|_| Error::Timeout("zookeeper receive"))?
            .map_err(|e| Error::Io("error reading frame length", e))?;
        if len > MAX_FRAME {
            return Err(Error::Protocol("oversized frame"));
        }
        let mut body = vec![0u8; len as usize];
        timeout(self.deadline, self.stream.read_exact(&mut body))
            .await
            .map_err(|_| Error::Timeout("zookeeper receive"))?
            .map_err(|e| Error::Io("error reading frame body", e))?;
        Ok(body)
    }

    async fn request(&mut self, opcode: i32, payload: &[u8]) -> Result<Vec<u8>, Error> {
        self.xid += 1;
        let mut body = Vec::with_capacity(payload.len() + 8);
        let _ = body.write_i32::<BigEndian>(self.xid);
        let _ = body.write_i32::<BigEndian>(opcode);
        body.extend_from_slice(payload);
        self.send_frame(&body).await?;

        let reply = self.read_frame().await?;
        let mut cursor = Cursor::new(reply.as_slice());
        let _xid = cursor
            .read_i32::<BigEndian>()
            .map_err(|_| Error::Protocol("short reply header"))?;
        let _zxid = cursor
            .read_i64::<BigEndian>()
            .map_err(|_| Error::Protocol("short reply header"))?;
        let err = cursor
            .read_i32::<BigEndian>()
            .map_err(|_| Error::Protocol("short reply header"))?;
        if err != 0 {
            return Err(Error::ZkReply(err));
        }
        Ok(reply[cursor.position() as usize..].to_vec())
    }

    async fn close(mut self) {
        let mut body = Vec::new();
        let _ = body.write_i32::<BigEndian>(self.xid + 1);
        let _ = body.write_i32::<BigEndian>(OP_CLOSE_SESSION);
        let _ = self.send_frame(&body).await;
    }
}

/// Read-only znode browser over a single-request-per-session client.
#[derive(Clone, Debug)]
pub struct ZkExplorer {
    host: String,
    port: u16,
    deadline: Duration,
}

impl ZkExplorer {
    /// Creates an explorer for the given server.
    pub fn new(host: impl Into<String>, port: u16, deadline: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            deadline,
        }
    }

    /// Children of a znode, sorted for stable rendering.
    ///
    /// # Errors
    ///
    /// Connection, timeout, or protocol errors; [`Error::ZkReply`] for
    /// server-side errors such as nonexistent nodes.
    pub async fn children(&self, path: &str) -> Result<Vec<String>, Error> {
        let mut session = Session::connect(&self.host, self.port, self.deadline).await?;

        let mut payload = Vec::new();
        write_ustring(&mut payload, path);
        payload.push(0); // no watch
        let reply = session.request(OP_GET_CHILDREN, &payload).await?;
        session.close().await;

        let mut cursor = Cursor::new(reply.as_slice());
        let count = cursor
            .read_i32::<BigEndian>()
            .map_err(|_| Error::Protocol("short children count"))?;
        let mut children = Vec::new();
        for _ in 0..count.max(0) {
            children.push(read_ustring(&mut cursor)?);
        }
        children.sort();
        Ok(children)
    }

    /// Data and stat of a znode.
    ///
    /// # Errors
    ///
    /// Connection, timeout, or protocol errors; [`Error::ZkReply`] for
    /// server-side errors such as nonexistent nodes.
    pub async fn node_data(&self, path: &str) -> Result<NodeData, Error> {
        let mut session = Session::connect(&self.host, self.port, self.deadline).await?;

        let mut payload = Vec::new();
        write_ustring(&mut payload, path);
        payload.push(0); // no watch
        let reply = session.request(OP_GET_DATA, &payload).await?;
        session.close().await;

        let mut cursor = Cursor::new(reply.as_slice());
        let data = read_buffer(&mut cursor)?;
        let stat = read_stat(&mut cursor)?;
        Ok(NodeData { data, stat })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    fn encode_stat(stat: &Stat, out: &mut Vec<u8>) {
        let _ = out.write_i64::<BigEndian>(stat.czxid);
        let _ = out.write_i64::<BigEndian>(stat.mzxid);
        let _ = out.write_i64::<BigEndian>(stat.ctime);
        let _ = out.write_i64::<BigEndian>(stat.mtime);
        let _ = out.write_i32::<BigEndian>(stat.version);
        let _ = out.write_i32::<BigEndian>(stat.cversion);
        let _ = out.write_i32::<BigEndian>(stat.aversion);
        let _ = out.write_i64::<BigEndian>(stat.ephemeral_owner);
        let _ = out.write_i32::<BigEndian>(stat.data_length);
        let _ = out.write_i32::<BigEndian>(stat.num_children);
        let _ = out.write_i64::<BigEndian>(stat.pzxid);
    }

    async fn write_frame(stream: &mut TcpStream, body: &[u8]) {
        use tokio::io::AsyncWriteExt;
        let mut frame = Vec::new();
        let _ = WriteBytesExt::write_u32::<BigEndian>(&mut frame, body.len() as u32);
        frame.extend_from_slice(body);
        stream.write_all(&frame).await.unwrap();
    }

    async fn read_frame_body(stream: &mut TcpStream) -> Vec<u8> {
        use tokio::io::AsyncReadExt;
        let len = stream.read_u32().await.unwrap();
        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body).await.unwrap();
        body
    }

    /// Speaks just enough of the protocol for one explorer call.
    async fn scripted_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            // connect handshake
            let _connect = read_frame_body(&mut stream).await;
            let mut response = Vec::new();
            let _ = response.write_i32::<BigEndian>(0); // protocol version
            let _ = response.write_i32::<BigEndian>(SESSION_TIMEOUT_MS);
            let _ = response.write_i64::<BigEndian>(0x77); // session id
            let _ = response.write_i32::<BigEndian>(16);
            response.extend_from_slice(&[0u8; 16]);
            write_frame(&mut stream, &response).await;

            loop {
                let request = read_frame_body(&mut stream).await;
                let mut cursor = Cursor::new(request.as_slice());
                let xid = cursor.read_i32::<BigEndian>().unwrap();
                let opcode = cursor.read_i32::<BigEndian>().unwrap();

                let mut reply = Vec::new();
                let _ = reply.write_i32::<BigEndian>(xid);
                let _ = reply.write_i64::<BigEndian>(1); // zxid
                match opcode {
                    OP_GET_CHILDREN => {
                        let _ = reply.write_i32::<BigEndian>(0); // err
                        let _ = reply.write_i32::<BigEndian>(2);
                        write_ustring(&mut reply, "config");
                        write_ustring(&mut reply, "brokers");
                    }
                    OP_GET_DATA => {
                        let path = read_ustring(&mut cursor).unwrap();
                        if path == "/missing" {
                            let _ = reply.write_i32::<BigEndian>(-101); // NoNode
                        } else {
                            let _ = reply.write_i32::<BigEndian>(0);
                            let _ = reply.write_i32::<BigEndian>(5);
                            reply.extend_from_slice(b"hello");
                            encode_stat(
                                &Stat {
                                    czxid: 3,
                                    data_length: 5,
                                    num_children: 0,
                                    ..Stat::default()
                                },
                                &mut reply,
                            );
                        }
                    }
                    OP_CLOSE_SESSION => return,
                    _ => {
                        let _ = reply.write_i32::<BigEndian>(-6); // unimplemented
                    }
                }
                write_frame(&mut stream, &reply).await;
            }
        });
        port
    }

    #[tokio::test]
    async fn lists_children_sorted() {
        let port = scripted_server().await;
        let explorer = ZkExplorer::new("127.0.0.1", port, Duration::from_secs(1));

        let children = explorer.children("/").await.unwrap();

        assert_eq!(children, vec!["brokers", "config"]);
    }

    #[tokio::test]
    async fn reads_data_and_stat() {
        let port = scripted_server().await;
        let explorer = ZkExplorer::new("127.0.0.1", port, Duration::from_secs(1));

        let node = explorer.node_data("/config").await.unwrap();

        assert_eq!(node.data, b"hello");
        assert_eq!(node.stat.czxid, 3);
        assert_eq!(node.stat.data_length, 5);
    }

    #[tokio::test]
    async fn missing_node_surfaces_server_code() {
        let port = scripted_server().await;
        let explorer = ZkExplorer::new("127.0.0.1", port, Duration::from_secs(1));

        assert!(matches!(
            explorer.node_data("/missing").await,
            Err(Error::ZkReply(-101))
        ));
    }

    #[test]
    fn stat_decode_consumes_all_fields() {
        let stat = Stat {
            czxid: 1,
            mzxid: 2,
            ctime: 3,
            mtime: 4,
            version: 5,
            cversion: 6,
            aversion: 7,
            ephemeral_owner: 8,
            data_length: 9,
            num_children: 10,
            pzxid: 11,
        };
        let mut bytes = Vec::new();
        encode_stat(&stat, &mut bytes);

        let mut cursor = Cursor::new(bytes.as_slice());
        assert_eq!(read_stat(&mut cursor).unwrap(), stat);
        assert_eq!(cursor.position() as usize, bytes.len());
    }
}
