//! In-process stand-in for `coqtop -ideslave`.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::BytesMut;
use coqide_core::{
    Interrupt, LaunchError, Launcher, ProverHandle, SpawnedProver, StateId, Value, codec,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    sync::Notify,
    task::JoinHandle,
};

/// Calls the fake prover received, in order.
pub type CallLog = Arc<Mutex<Vec<(String, Value)>>>;

/// Launches a [`FakeProver`] per call and counts lifecycle events.
#[derive(Default)]
pub struct FakeLauncher {
    pub launches: Arc<AtomicUsize>,
    pub terminations: Arc<AtomicUsize>,
    pub calls: CallLog,
    pub refuse: bool,
}

impl FakeLauncher {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, _extra_args: &[String]) -> Result<SpawnedProver, LaunchError> {
        if self.refuse {
            return Err(LaunchError::ExecutableNotFound("coqtop".into()));
        }
        self.launches.fetch_add(1, Ordering::SeqCst);

        let (client, prover) = tokio::io::duplex(8192);
        let interrupt = Arc::new(Notify::new());
        let task = tokio::spawn(
            FakeProver {
                io: prover,
                interrupt: Arc::clone(&interrupt),
                calls: Arc::clone(&self.calls),
                tip: 1,
                goal_fails: false,
            }
            .run(),
        );
        let (reader, writer) = tokio::io::split(client);
        Ok(SpawnedProver {
            reader: Box::new(reader),
            writer: Box::new(writer),
            interrupter: Arc::new(FakeInterrupt(interrupt)),
            handle: Box::new(FakeHandle {
                task: Some(task),
                terminations: Arc::clone(&self.terminations),
            }),
        })
    }
}

struct FakeInterrupt(Arc<Notify>);

impl Interrupt for FakeInterrupt {
    fn interrupt(&self) -> io::Result<()> {
        self.0.notify_one();
        Ok(())
    }
}

struct FakeHandle {
    task: Option<JoinHandle<()>>,
    terminations: Arc<AtomicUsize>,
}

#[async_trait]
impl ProverHandle for FakeHandle {
    async fn terminate(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.terminations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn id(&self) -> Option<u32> {
        None
    }
}

/// Answers calls the way the real prover does, with a few triggers:
/// an Add containing `FAIL` is rejected, `DIE` closes the stream, `NOGOAL`
/// is accepted but the Goal after it fails, and an Add or Query containing
/// `Hang` only answers once interrupted.
struct FakeProver {
    io: DuplexStream,
    interrupt: Arc<Notify>,
    calls: CallLog,
    tip: u64,
    goal_fails: bool,
}

impl FakeProver {
    async fn run(mut self) {
        let mut buf = BytesMut::new();
        loop {
            while let Ok(Some((method, arg))) = codec::take_call(&mut buf) {
                self.calls.lock().unwrap().push((method.clone(), arg.clone()));
                let Some(reply) = self.answer(&method, &arg).await else {
                    return;
                };
                if self.drip(&reply).await.is_err() {
                    return;
                }
            }
            match self.io.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }

    /// Write in small pieces so replies straddle reads.
    async fn drip(&mut self, reply: &str) -> io::Result<()> {
        for chunk in reply.as_bytes().chunks(7) {
            self.io.write_all(chunk).await?;
            tokio::task::yield_now().await;
        }
        self.io.flush().await
    }

    async fn answer(&mut self, method: &str, arg: &Value) -> Option<String> {
        let reply = match method {
            "Init" => good(&format!("<state_id val=\"{}\"/>", self.tip)),
            "Add" => {
                let (command, at) = add_args(arg)?;
                if command.contains("DIE") {
                    return None;
                }
                if command.contains("Hang") {
                    self.interrupt.notified().await;
                    return Some(fail(at, "User interrupt."));
                }
                self.goal_fails = command.contains("NOGOAL");
                if command.contains("FAIL") {
                    fail(at, "Syntax error: illegal begin of vernac.")
                } else {
                    self.tip += 1;
                    good(&format!(
                        "<pair><state_id val=\"{}\"/><pair><union val=\"in_l\"><unit/></union>\
                         <string></string></pair></pair>",
                        self.tip
                    ))
                }
            }
            "Goal" if self.goal_fails => {
                self.goal_fails = false;
                fail(StateId(self.tip), "No focused proof.")
            }
            "Goal" => good(
                "<option val=\"some\"><goals><list><goal><string>1</string><list/>\
                 <richpp><_>True</_></richpp></goal></list><list/><list/><list/></goals></option>",
            ),
            "Edit_at" => good("<union val=\"in_l\"><unit/></union>"),
            "Query" => {
                let command = arg.as_pair().and_then(|(c, _)| c.as_text()).unwrap_or_default();
                if command.contains("Hang") {
                    self.interrupt.notified().await;
                    fail(StateId(self.tip), "User interrupt.")
                } else {
                    format!(
                        "<feedback object=\"state\" route=\"0\"><state_id val=\"{}\"/>\
                         <feedback_content val=\"message\"><message><message_level val=\"notice\"/>\
                         <option val=\"none\"/><richpp><_>True\n&nbsp;&nbsp;&nbsp;&nbsp;:&nbsp;Prop</_>\
                         </richpp></message></feedback_content></feedback>{}",
                        self.tip,
                        good("<string></string>")
                    )
                }
            }
            "Status" => good(
                "<status><list><string>Top</string></list><option val=\"some\"><string>foo</string>\
                 </option><list><string>foo</string></list><int>1</int></status>",
            ),
            other => fail(StateId(self.tip), &format!("Unknown call {other}")),
        };
        Some(reply)
    }
}

fn add_args(arg: &Value) -> Option<(String, StateId)> {
    let (left, right) = arg.as_pair()?;
    let (command, _) = left.as_pair()?;
    let (at, _) = right.as_pair()?;
    Some((command.as_text()?.to_owned(), at.as_state_id()?))
}

fn good(value: &str) -> String {
    format!("<value val=\"good\">{value}</value>\n")
}

fn fail(state: StateId, message: &str) -> String {
    format!(
        "<value val=\"fail\" loc_s=\"0\" loc_e=\"4\"><state_id val=\"{state}\"/>\
         <richpp><_>{message}</_></richpp></value>\n"
    )
}
