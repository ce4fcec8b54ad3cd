//! The inbound command pipeline: policy gate, lockout check, command parse,
//! risk-based authentication, bounded-concurrency execution, and response
//! delivery.

use crate::approval::ApprovalStore;
use crate::ops::{Op, Registry, RiskLevel};
use crate::policy::Policy;
use crate::ratelimit::RateLimiter;
use crate::totp::Totp;
use crate::traits::{MessageHandler, Notifier};
use crate::types::{InboundMessage, Notification};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const MAX_CONCURRENT_OPS: usize = 2;
const OP_TIMEOUT: Duration = Duration::from_secs(30);
const RESPOND_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REPLY_CHARS: usize = 4096;

/// Authorizes inbound messages and dispatches commands to ops. The three
/// security collaborators are independently optional; when all are absent
/// every risk level executes directly and `/do` and `/approve` are ordinary
/// registry lookups.
pub struct Dispatcher {
    policy: Arc<Policy>,
    ops: Arc<Registry>,
    notifier: Arc<dyn Notifier>,
    sem: Semaphore,
    totp: Option<Arc<Totp>>,
    limiter: Option<Arc<RateLimiter>>,
    approvals: Option<Arc<ApprovalStore>>,
}

impl Dispatcher {
    pub fn new(policy: Arc<Policy>, ops: Arc<Registry>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            policy,
            ops,
            notifier,
            sem: Semaphore::new(MAX_CONCURRENT_OPS),
            totp: None,
            limiter: None,
            approvals: None,
        }
    }

    /// Attaches the optional security components.
    pub fn with_security(
        mut self,
        totp: Option<Arc<Totp>>,
        limiter: Option<Arc<RateLimiter>>,
        approvals: Option<Arc<ApprovalStore>>,
    ) -> Self {
        self.totp = totp;
        self.limiter = limiter;
        self.approvals = approvals;
        self
    }

    /// Processes one inbound message end to end.
    pub async fn handle(&self, msg: InboundMessage) {
        if let Err(e) = self
            .policy
            .authorize(msg.chat_id, msg.update_id, msg.timestamp)
        {
            tracing::debug!(chat_id = msg.chat_id, error = %e, "message rejected by policy");
            return;
        }

        if let Some(limiter) = &self.limiter {
            if let Err(e) = limiter.check(msg.chat_id) {
                self.respond(msg.chat_id, format!("Locked out: {e}")).await;
                return;
            }
        }

        let Some((cmd, args)) = parse_command(&msg.text) else {
            return;
        };

        // Two-step built-ins exist only when the full security trio can
        // back them.
        if (cmd == "do" || cmd == "approve") && self.totp.is_some() && self.approvals.is_some() {
            if cmd == "do" {
                self.handle_do(msg.chat_id, &args).await;
            } else {
                self.handle_approve(msg.chat_id, &args).await;
            }
            return;
        }

        let Some(op) = self.ops.get(&cmd) else {
            self.respond(
                msg.chat_id,
                format!("Unknown command: /{cmd}\nSend /help for available commands."),
            )
            .await;
            return;
        };

        let mut args = args;
        match op.risk() {
            RiskLevel::None => {}
            RiskLevel::Low => {
                if let Some(totp) = &self.totp {
                    let (stripped, code) = extract_totp(&args);
                    if code.is_empty() {
                        self.record_failure(msg.chat_id);
                        self.respond(
                            msg.chat_id,
                            format!("/{cmd} requires a TOTP code as the last argument."),
                        )
                        .await;
                        return;
                    }
                    if !totp.verify(&code) {
                        self.record_failure(msg.chat_id);
                        self.respond(msg.chat_id, "Invalid TOTP code.".to_string())
                            .await;
                        return;
                    }
                    self.reset_failures(msg.chat_id);
                    args = stripped;
                }
            }
            RiskLevel::High => {
                if self.totp.is_some() {
                    self.respond(
                        msg.chat_id,
                        format!(
                            "/{cmd} is a high-risk operation. \
                             Use /do {cmd} <args> <totp> for two-step approval."
                        ),
                    )
                    .await;
                    return;
                }
            }
        }

        self.execute_and_respond(msg.chat_id, &cmd, op, &args).await;
    }

    /// `/do <op> [args] <totp>`: verify the TOTP, then park the op behind a
    /// fresh approval nonce. Nothing executes here.
    async fn handle_do(&self, chat_id: i64, args: &str) {
        let (Some(totp), Some(approvals)) = (&self.totp, &self.approvals) else {
            return;
        };

        let args = args.trim();
        if args.is_empty() {
            self.respond(chat_id, "Usage: /do <op> [args] <totp>".to_string())
                .await;
            return;
        }

        let (op_name, rest) = match args.split_once(' ') {
            Some((head, tail)) => (head, tail.trim()),
            None => (args, ""),
        };
        let op_name = op_name.to_lowercase();

        let (stripped, code) = extract_totp(rest);
        if code.is_empty() {
            self.record_failure(chat_id);
            self.respond(
                chat_id,
                "/do requires a TOTP code as the last argument.".to_string(),
            )
            .await;
            return;
        }
        if !totp.verify(&code) {
            self.record_failure(chat_id);
            self.respond(chat_id, "Invalid TOTP code.".to_string()).await;
            return;
        }
        self.reset_failures(chat_id);

        if self.ops.get(&op_name).is_none() {
            self.respond(
                chat_id,
                format!("Unknown command: /{op_name}\nSend /help for available commands."),
            )
            .await;
            return;
        }

        match approvals.create(chat_id, &op_name, &stripped) {
            Ok(nonce) => {
                self.respond(
                    chat_id,
                    format!("Pending approval for /{op_name}. Send:\n/approve {nonce} <totp>"),
                )
                .await;
            }
            Err(e) => self.respond(chat_id, e.to_string()).await,
        }
    }

    /// `/approve <nonce> <totp>`: verify the TOTP, consume the nonce, then
    /// run the stored op through the normal execution gate.
    async fn handle_approve(&self, chat_id: i64, args: &str) {
        let (Some(totp), Some(approvals)) = (&self.totp, &self.approvals) else {
            return;
        };

        let (nonce, code) = extract_totp(args.trim());
        let nonce = nonce.trim().to_string();
        if code.is_empty() || nonce.is_empty() || nonce.contains(' ') {
            self.respond(chat_id, "Usage: /approve <nonce> <totp>".to_string())
                .await;
            return;
        }

        if !totp.verify(&code) {
            self.record_failure(chat_id);
            self.respond(chat_id, "Invalid TOTP code.".to_string()).await;
            return;
        }
        self.reset_failures(chat_id);

        match approvals.consume(&nonce, chat_id) {
            Err(e) => {
                self.respond(chat_id, format!("Approval failed: {e}")).await;
            }
            Ok((op_name, op_args)) => {
                // The op may have been unregistered between /do and /approve;
                // the nonce is spent either way.
                let Some(op) = self.ops.get(&op_name) else {
                    self.respond(
                        chat_id,
                        format!("Approved op /{op_name} is no longer registered."),
                    )
                    .await;
                    return;
                };
                self.execute_and_respond(chat_id, &op_name, op, &op_args)
                    .await;
            }
        }
    }

    async fn execute_and_respond(&self, chat_id: i64, cmd: &str, op: Arc<dyn Op>, args: &str) {
        let Ok(_permit) = self.sem.try_acquire() else {
            self.respond(
                chat_id,
                "Busy — too many operations running. Try again shortly.".to_string(),
            )
            .await;
            return;
        };

        match tokio::time::timeout(OP_TIMEOUT, op.execute(args)).await {
            Err(_) => {
                tracing::error!(op = %cmd, "op timed out");
                self.respond(
                    chat_id,
                    format!(
                        "Error running /{cmd}: timed out after {}s",
                        OP_TIMEOUT.as_secs()
                    ),
                )
                .await;
            }
            Ok(Err(e)) => {
                tracing::error!(op = %cmd, error = %e, "op failed");
                self.respond(chat_id, format!("Error running /{cmd}: {e}"))
                    .await;
            }
            Ok(Ok(result)) => self.respond(chat_id, result).await,
        }
    }

    async fn respond(&self, chat_id: i64, text: String) {
        let n = Notification {
            id: String::new(),
            text: truncate_reply(text),
            source: "dispatcher".to_string(),
            created_at: Utc::now(),
        };

        match tokio::time::timeout(RESPOND_TIMEOUT, self.notifier.send(n)).await {
            Err(_) => tracing::error!(chat_id, "response delivery timed out"),
            Ok(Err(e)) => tracing::error!(chat_id, error = %e, "failed to send response"),
            Ok(Ok(())) => {}
        }
    }

    fn record_failure(&self, chat_id: i64) {
        if let Some(limiter) = &self.limiter {
            limiter.record_failure(chat_id);
        }
    }

    fn reset_failures(&self, chat_id: i64) {
        if let Some(limiter) = &self.limiter {
            limiter.reset(chat_id);
        }
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn handle(&self, msg: InboundMessage) {
        Dispatcher::handle(self, msg).await;
    }
}

/// Extracts the command name and arguments from a message. Handles
/// `/command`, `/command args`, and `/command@botname args`; the name is
/// case-folded. Non-commands yield nothing.
fn parse_command(text: &str) -> Option<(String, String)> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;

    let (cmd, args) = match rest.split_once(' ') {
        Some((cmd, args)) => (cmd, args.trim()),
        None => (rest, ""),
    };

    let cmd = match cmd.split_once('@') {
        Some((cmd, _bot)) => cmd,
        None => cmd,
    };
    if cmd.is_empty() {
        return None;
    }
    Some((cmd.to_lowercase(), args.to_string()))
}

/// Splits a trailing 6-digit TOTP code off the args. Returns the remaining
/// args and the code, or the original args and an empty code when the last
/// token is not exactly six digits.
fn extract_totp(args: &str) -> (String, String) {
    let trimmed = args.trim_end();
    if trimmed.is_empty() {
        return (String::new(), String::new());
    }

    let (head, last) = match trimmed.rsplit_once(' ') {
        Some((head, last)) => (head, last),
        None => ("", trimmed),
    };

    if last.len() == 6 && last.bytes().all(|b| b.is_ascii_digit()) {
        (head.trim_end().to_string(), last.to_string())
    } else {
        (args.to_string(), String::new())
    }
}

/// Keeps replies inside the chat platform's message limit, preserving the
/// tail behind a single-character ellipsis.
fn truncate_reply(text: String) -> String {
    let count = text.chars().count();
    if count <= MAX_REPLY_CHARS {
        return text;
    }
    let skip = count - (MAX_REPLY_CHARS - 1);
    let tail: String = text.chars().skip(skip).collect();
    format!("…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testutil::FnOp;
    use anyhow::Result;
    use chrono::{DateTime, Duration as ChronoDuration};
    use std::sync::Mutex;

    struct SpyNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl SpyNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        fn last_text(&self) -> String {
            self.sent
                .lock()
                .unwrap()
                .last()
                .map(|n| n.text.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl Notifier for SpyNotifier {
        fn name(&self) -> &str {
            "spy"
        }
        async fn send(&self, n: Notification) -> Result<()> {
            self.sent.lock().unwrap().push(n);
            Ok(())
        }
    }

    const TEST_SECRET: &str = "JBSWY3DPEHPK3PXP";
    const T0: i64 = 1_700_000_000;

    fn fixed_totp() -> Arc<Totp> {
        Arc::new(
            Totp::new(TEST_SECRET)
                .unwrap()
                .with_clock(Arc::new(|| DateTime::from_timestamp(T0, 0).unwrap())),
        )
    }

    fn valid_code() -> String {
        fixed_totp().code_at(DateTime::from_timestamp(T0, 0).unwrap())
    }

    fn invalid_code() -> String {
        if valid_code() == "000000" {
            "000001".to_string()
        } else {
            "000000".to_string()
        }
    }

    fn dispatcher(spy: &Arc<SpyNotifier>, ops: Vec<Arc<dyn Op>>) -> Dispatcher {
        let registry = Arc::new(Registry::new());
        for op in ops {
            registry.register(op).unwrap();
        }
        Dispatcher::new(
            Arc::new(Policy::new(&[100])),
            registry,
            spy.clone() as Arc<dyn Notifier>,
        )
    }

    struct SecureParts {
        limiter: Arc<RateLimiter>,
        approvals: Arc<ApprovalStore>,
    }

    fn secure_dispatcher(spy: &Arc<SpyNotifier>, ops: Vec<Arc<dyn Op>>) -> (Dispatcher, SecureParts) {
        let limiter = Arc::new(RateLimiter::new());
        let approvals = Arc::new(ApprovalStore::new());
        let d = dispatcher(spy, ops).with_security(
            Some(fixed_totp()),
            Some(limiter.clone()),
            Some(approvals.clone()),
        );
        (d, SecureParts { limiter, approvals })
    }

    fn msg(text: &str) -> InboundMessage {
        static NEXT_UPDATE: std::sync::atomic::AtomicI64 = std::sync::atomic::AtomicI64::new(1);
        InboundMessage {
            update_id: NEXT_UPDATE.fetch_add(1, std::sync::atomic::Ordering::SeqCst),
            chat_id: 100,
            user_id: 1,
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn slow_op() -> Arc<dyn Op> {
        struct SlowOp;
        #[async_trait]
        impl Op for SlowOp {
            fn name(&self) -> &str {
                "slow"
            }
            fn description(&self) -> &str {
                "slow op"
            }
            fn risk(&self) -> RiskLevel {
                RiskLevel::None
            }
            async fn execute(&self, _args: &str) -> Result<String> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("done".to_string())
            }
        }
        Arc::new(SlowOp)
    }

    // --- pipeline without security ---

    #[tokio::test]
    async fn dispatches_authorized_command() {
        let spy = SpyNotifier::new();
        let d = dispatcher(&spy, vec![FnOp::echo()]);

        d.handle(msg("/echo hello world")).await;

        assert_eq!(spy.count(), 1);
        assert_eq!(spy.last_text(), "echo: hello world");
    }

    #[tokio::test]
    async fn unauthorized_chat_is_silently_dropped() {
        let spy = SpyNotifier::new();
        let d = dispatcher(&spy, vec![FnOp::echo()]);

        let mut m = msg("/echo test");
        m.chat_id = 999;
        d.handle(m).await;

        assert_eq!(spy.count(), 0);
    }

    #[tokio::test]
    async fn stale_message_is_silently_dropped() {
        let spy = SpyNotifier::new();
        let d = dispatcher(&spy, vec![FnOp::echo()]);

        let mut m = msg("/echo test");
        m.timestamp = Utc::now() - ChronoDuration::minutes(10);
        d.handle(m).await;

        assert_eq!(spy.count(), 0);
    }

    #[tokio::test]
    async fn duplicate_update_is_silently_dropped() {
        let spy = SpyNotifier::new();
        let d = dispatcher(&spy, vec![FnOp::echo()]);

        let m = msg("/echo once");
        d.handle(m.clone()).await;
        d.handle(m).await;

        assert_eq!(spy.count(), 1);
    }

    #[tokio::test]
    async fn unknown_command_suggests_help() {
        let spy = SpyNotifier::new();
        let d = dispatcher(&spy, vec![]);

        d.handle(msg("/foobar")).await;

        assert_eq!(spy.count(), 1);
        assert!(spy.last_text().contains("Unknown command"));
        assert!(spy.last_text().contains("/help"));
    }

    #[tokio::test]
    async fn non_command_text_is_ignored() {
        let spy = SpyNotifier::new();
        let d = dispatcher(&spy, vec![FnOp::echo()]);

        d.handle(msg("just a regular message")).await;

        assert_eq!(spy.count(), 0);
    }

    #[tokio::test]
    async fn op_errors_are_reported() {
        let spy = SpyNotifier::new();
        let d = dispatcher(
            &spy,
            vec![Arc::new(FnOp {
                name: "fail",
                risk: RiskLevel::Low,
                result: |_| anyhow::bail!("something broke"),
            })],
        );

        d.handle(msg("/fail")).await;

        assert_eq!(spy.count(), 1);
        assert!(spy.last_text().contains("Error running /fail"));
        assert!(spy.last_text().contains("something broke"));
    }

    #[tokio::test]
    async fn concurrency_gate_rejects_a_third_op() {
        let spy = SpyNotifier::new();
        let d = Arc::new(dispatcher(&spy, vec![slow_op()]));

        // Fill both permits.
        let p1 = d.sem.try_acquire().unwrap();
        let p2 = d.sem.try_acquire().unwrap();

        d.handle(msg("/slow")).await;

        drop(p1);
        drop(p2);

        assert_eq!(spy.count(), 1);
        assert!(spy.last_text().contains("Busy"));
    }

    // --- parsing ---

    #[test]
    fn parse_command_table() {
        let cases = [
            ("/status", Some(("status", ""))),
            ("/echo hello world", Some(("echo", "hello world"))),
            ("/status@mybot", Some(("status", ""))),
            ("/echo@mybot hello", Some(("echo", "hello"))),
            ("/STATUS", Some(("status", ""))),
            ("  /echo  test  ", Some(("echo", "test"))),
            ("not a command", None),
            ("", None),
            ("/", None),
        ];
        for (input, want) in cases {
            let got = parse_command(input);
            let want = want.map(|(c, a)| (c.to_string(), a.to_string()));
            assert_eq!(got, want, "parse_command({input:?})");
        }
    }

    #[test]
    fn extract_totp_table() {
        let cases = [
            ("123456", "", "123456"),
            ("hello 123456", "hello", "123456"),
            ("hello world 123456", "hello world", "123456"),
            ("hello", "hello", ""),
            ("", "", ""),
            ("12345", "12345", ""),
            ("1234567", "1234567", ""),
            ("hello abcdef", "hello abcdef", ""),
        ];
        for (input, want_args, want_code) in cases {
            let (args, code) = extract_totp(input);
            assert_eq!(
                (args.as_str(), code.as_str()),
                (want_args, want_code),
                "extract_totp({input:?})"
            );
        }
    }

    #[test]
    fn long_replies_keep_the_tail_behind_an_ellipsis() {
        let short = "short reply".to_string();
        assert_eq!(truncate_reply(short.clone()), short);

        let exact = "x".repeat(MAX_REPLY_CHARS);
        assert_eq!(truncate_reply(exact.clone()), exact);

        let long = format!("{}{}", "a".repeat(5000), "TAIL");
        let out = truncate_reply(long);
        assert_eq!(out.chars().count(), MAX_REPLY_CHARS);
        assert!(out.starts_with('…'));
        assert!(out.ends_with("TAIL"));
    }

    // --- TOTP gating ---

    #[tokio::test]
    async fn valid_totp_allows_execution_and_resets_failures() {
        let spy = SpyNotifier::new();
        let (d, parts) = secure_dispatcher(&spy, vec![FnOp::echo()]);

        parts.limiter.record_failure(100);
        d.handle(msg(&format!("/echo hello {}", valid_code()))).await;

        assert_eq!(spy.count(), 1);
        assert_eq!(spy.last_text(), "echo: hello");
        // A reset limiter locks only after five fresh failures.
        for _ in 0..4 {
            parts.limiter.record_failure(100);
        }
        assert!(parts.limiter.check(100).is_ok());
    }

    #[tokio::test]
    async fn invalid_totp_is_rejected_and_counted() {
        let spy = SpyNotifier::new();
        let (d, parts) = secure_dispatcher(&spy, vec![FnOp::echo()]);

        d.handle(msg(&format!("/echo hello {}", invalid_code())))
            .await;

        assert_eq!(spy.count(), 1);
        assert!(spy.last_text().contains("Invalid TOTP"));
        for _ in 0..4 {
            parts.limiter.record_failure(100);
        }
        assert!(parts.limiter.check(100).is_err(), "failure was recorded");
    }

    #[tokio::test]
    async fn missing_totp_is_rejected_and_counted() {
        let spy = SpyNotifier::new();
        let (d, _parts) = secure_dispatcher(&spy, vec![FnOp::echo()]);

        d.handle(msg("/echo hello")).await;

        assert_eq!(spy.count(), 1);
        assert!(spy
            .last_text()
            .contains("/echo requires a TOTP code as the last argument."));
    }

    #[tokio::test]
    async fn risk_none_ops_bypass_totp() {
        let spy = SpyNotifier::new();
        let (d, _parts) = secure_dispatcher(
            &spy,
            vec![Arc::new(FnOp {
                name: "ping",
                risk: RiskLevel::None,
                result: |_| Ok("pong".to_string()),
            })],
        );

        d.handle(msg("/ping")).await;

        assert_eq!(spy.count(), 1);
        assert_eq!(spy.last_text(), "pong");
    }

    #[tokio::test]
    async fn locked_out_chat_gets_a_lockout_reply() {
        let spy = SpyNotifier::new();
        let (d, parts) = secure_dispatcher(&spy, vec![FnOp::echo()]);

        for _ in 0..5 {
            parts.limiter.record_failure(100);
        }
        d.handle(msg(&format!("/echo hello {}", valid_code()))).await;

        assert_eq!(spy.count(), 1);
        assert!(spy.last_text().starts_with("Locked out:"));
    }

    #[tokio::test]
    async fn five_invalid_codes_lock_the_chat_out() {
        let spy = SpyNotifier::new();
        let (d, _parts) = secure_dispatcher(&spy, vec![FnOp::echo()]);

        for _ in 0..5 {
            d.handle(msg(&format!("/echo hi {}", invalid_code()))).await;
        }
        d.handle(msg(&format!("/echo hi {}", valid_code()))).await;

        assert_eq!(spy.count(), 6);
        assert!(spy.last_text().starts_with("Locked out:"));
    }

    #[tokio::test]
    async fn high_risk_ops_cannot_run_directly() {
        let spy = SpyNotifier::new();
        let (d, _parts) = secure_dispatcher(
            &spy,
            vec![Arc::new(FnOp {
                name: "danger",
                risk: RiskLevel::High,
                result: |args| Ok(format!("danger: {args}")),
            })],
        );

        d.handle(msg(&format!("/danger hello {}", valid_code())))
            .await;

        assert_eq!(spy.count(), 1);
        assert!(spy.last_text().contains("/do danger"));
        assert!(!spy.last_text().contains("danger: hello"));
    }

    // --- /do and /approve ---

    #[tokio::test]
    async fn do_creates_a_pending_approval() {
        let spy = SpyNotifier::new();
        let (d, parts) = secure_dispatcher(&spy, vec![FnOp::echo()]);

        d.handle(msg(&format!("/do echo myargs {}", valid_code())))
            .await;

        assert_eq!(spy.count(), 1);
        let reply = spy.last_text();
        assert!(reply.contains("Pending approval for /echo"));
        assert!(reply.contains("/approve"));

        // The reply carries a 16-hex nonce the store will honor.
        let nonce = reply
            .split_whitespace()
            .find(|tok| tok.len() == 16 && tok.bytes().all(|b| b.is_ascii_hexdigit()))
            .expect("reply contains a nonce");
        let (op, args) = parts.approvals.consume(nonce, 100).unwrap();
        assert_eq!(op, "echo");
        assert_eq!(args, "myargs");
    }

    #[tokio::test]
    async fn do_without_args_shows_usage() {
        let spy = SpyNotifier::new();
        let (d, _parts) = secure_dispatcher(&spy, vec![FnOp::echo()]);

        d.handle(msg("/do")).await;

        assert!(spy.last_text().starts_with("Usage:"));
    }

    #[tokio::test]
    async fn do_without_totp_is_rejected() {
        let spy = SpyNotifier::new();
        let (d, _parts) = secure_dispatcher(&spy, vec![FnOp::echo()]);

        d.handle(msg("/do echo")).await;

        assert!(spy.last_text().contains("requires a TOTP"));
    }

    #[tokio::test]
    async fn do_with_invalid_totp_is_rejected() {
        let spy = SpyNotifier::new();
        let (d, parts) = secure_dispatcher(&spy, vec![FnOp::echo()]);

        d.handle(msg(&format!("/do echo {}", invalid_code()))).await;

        assert!(spy.last_text().contains("Invalid TOTP"));
        for _ in 0..4 {
            parts.limiter.record_failure(100);
        }
        assert!(parts.limiter.check(100).is_err(), "failure was recorded");
    }

    #[tokio::test]
    async fn do_with_unknown_op_is_rejected() {
        let spy = SpyNotifier::new();
        let (d, _parts) = secure_dispatcher(&spy, vec![]);

        d.handle(msg(&format!("/do nonexistent {}", valid_code())))
            .await;

        assert!(spy.last_text().contains("Unknown command"));
    }

    #[tokio::test]
    async fn approve_executes_the_stored_op_exactly_once() {
        let spy = SpyNotifier::new();
        let (d, parts) = secure_dispatcher(&spy, vec![FnOp::echo()]);

        let nonce = parts.approvals.create(100, "echo", "world").unwrap();
        d.handle(msg(&format!("/approve {nonce} {}", valid_code())))
            .await;

        assert_eq!(spy.count(), 1);
        assert_eq!(spy.last_text(), "echo: world");

        // Replaying the nonce fails.
        d.handle(msg(&format!("/approve {nonce} {}", valid_code())))
            .await;
        assert!(spy.last_text().starts_with("Approval failed:"));
    }

    #[tokio::test]
    async fn approve_without_totp_shows_usage() {
        let spy = SpyNotifier::new();
        let (d, parts) = secure_dispatcher(&spy, vec![FnOp::echo()]);

        let nonce = parts.approvals.create(100, "echo", "").unwrap();
        d.handle(msg(&format!("/approve {nonce}"))).await;

        assert!(spy.last_text().starts_with("Usage:"));
    }

    #[tokio::test]
    async fn approve_with_invalid_totp_is_rejected() {
        let spy = SpyNotifier::new();
        let (d, parts) = secure_dispatcher(&spy, vec![FnOp::echo()]);

        let nonce = parts.approvals.create(100, "echo", "").unwrap();
        d.handle(msg(&format!("/approve {nonce} {}", invalid_code())))
            .await;

        assert!(spy.last_text().contains("Invalid TOTP"));
        // The nonce was not consumed.
        assert!(parts.approvals.consume(&nonce, 100).is_ok());
    }

    #[tokio::test]
    async fn approve_of_unregistered_op_consumes_the_nonce() {
        let spy = SpyNotifier::new();
        let (d, parts) = secure_dispatcher(&spy, vec![]);

        let nonce = parts.approvals.create(100, "vanished", "x").unwrap();
        d.handle(msg(&format!("/approve {nonce} {}", valid_code())))
            .await;

        assert!(spy.last_text().contains("no longer registered"));
        assert!(parts.approvals.consume(&nonce, 100).is_err());
    }

    // --- backwards-compat mode ---

    #[tokio::test]
    async fn absent_security_skips_all_checks() {
        let spy = SpyNotifier::new();
        let d = dispatcher(
            &spy,
            vec![
                FnOp::echo(),
                Arc::new(FnOp {
                    name: "danger",
                    risk: RiskLevel::High,
                    result: |args| Ok(format!("danger: {args}")),
                }),
            ],
        );

        d.handle(msg("/echo hello world")).await;
        assert_eq!(spy.last_text(), "echo: hello world");

        // High-risk ops run directly without a verifier attached.
        d.handle(msg("/danger now")).await;
        assert_eq!(spy.last_text(), "danger: now");

        // /do is not a built-in in this mode.
        d.handle(msg("/do echo hi 123456")).await;
        assert!(spy.last_text().contains("Unknown command"));
    }
}
