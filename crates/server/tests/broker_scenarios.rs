//! End-to-end broker scenarios
//!
//! Drives the dispatcher the way the socket reader does, with recording
//! sinks standing in for peers and stub providers standing in for
//! vendors.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use classbridge_config::Settings;
use classbridge_core::{
    ConnectionId, LanguageTag, Outbound, ProviderError, ProviderResult, SendError, SessionId,
    SpeechSynthesizer, SpeechToText, SynthesisOptions, SynthesisResult, Translator,
};
use classbridge_pipeline::{DecliningTranscoder, TtsRouter};
use classbridge_server::state::{AppState, BrokerBuilder};
use classbridge_server::ws::disconnect;
use classbridge_storage::{
    InMemorySessionStore, InMemoryTranslationStore, SessionQuality, SessionStore,
    TranslationStore,
};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Records everything sent to one peer.
#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<String>>,
    closes: Mutex<Vec<(u16, String)>>,
    pings: AtomicU32,
    terminated: AtomicBool,
    fail_sends: AtomicU32,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing(times: u32) -> Arc<Self> {
        let sink = Self::new();
        sink.fail_sends.store(times, Ordering::SeqCst);
        sink
    }

    fn messages(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    fn messages_of_type(&self, kind: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m["type"] == kind)
            .collect()
    }

    fn last_of_type(&self, kind: &str) -> Option<Value> {
        self.messages_of_type(kind).pop()
    }

    fn closes(&self) -> Vec<(u16, String)> {
        self.closes.lock().clone()
    }
}

#[async_trait]
impl Outbound for RecordingSink {
    async fn send_text(&self, payload: String) -> Result<(), SendError> {
        if self.fail_sends.load(Ordering::SeqCst) > 0 {
            self.fail_sends.fetch_sub(1, Ordering::SeqCst);
            return Err(SendError::Io("injected failure".to_string()));
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    async fn send_ping(&self) -> Result<(), SendError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) {
        self.closes.lock().push((code, reason.to_string()));
    }

    async fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// Fixed-table translator; unknown targets fail when `strict` is set.
struct StubTranslator {
    fail_targets: Vec<LanguageTag>,
}

impl StubTranslator {
    fn new() -> Self {
        Self {
            fail_targets: Vec::new(),
        }
    }

    fn failing_for(target: &str) -> Self {
        Self {
            fail_targets: vec![LanguageTag::new(target)],
        }
    }
}

#[async_trait]
impl Translator for StubTranslator {
    async fn translate(
        &self,
        text: &str,
        _source: &LanguageTag,
        target: &LanguageTag,
    ) -> ProviderResult<String> {
        if self.fail_targets.contains(target) {
            return Err(ProviderError::Transient("vendor down".to_string()));
        }
        Ok(match (text, target.as_str()) {
            ("Hello world", "es-ES") => "Hola mundo".to_string(),
            ("Hello world", "fr-FR") => "Bonjour le monde".to_string(),
            _ => format!("{text} [{target}]"),
        })
    }

    fn name(&self) -> &str {
        "stub"
    }
}

struct StubTts;

#[async_trait]
impl SpeechSynthesizer for StubTts {
    async fn synthesize(
        &self,
        _text: &str,
        _options: &SynthesisOptions,
    ) -> ProviderResult<SynthesisResult> {
        Ok(SynthesisResult::server_audio(vec![0xAB; 16], "openai"))
    }

    fn service_type(&self) -> &str {
        "openai"
    }
}

struct StubStt(&'static str);

#[async_trait]
impl SpeechToText for StubStt {
    async fn transcribe(&self, _audio: &[u8], _language: &LanguageTag) -> ProviderResult<String> {
        Ok(self.0.to_string())
    }

    fn name(&self) -> &str {
        "stub-stt"
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    state: AppState,
    sessions: Arc<InMemorySessionStore>,
    translations: Arc<InMemoryTranslationStore>,
}

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.timeouts.session_expired_message_delay_ms = 120;
    settings.timeouts.invalid_classroom_message_delay_ms = 100;
    settings.features.two_way = true;
    settings
}

fn build_harness(settings: Settings, translator: StubTranslator, stt: StubStt) -> Harness {
    let sessions = Arc::new(InMemorySessionStore::new());
    let translations = Arc::new(InMemoryTranslationStore::new());

    let mut tts = TtsRouter::new(
        settings.providers.default_tts_service.clone(),
        settings.providers.fallback_tts_service.clone(),
        settings.timeouts.provider_timeout(),
    );
    tts.register(Arc::new(StubTts));

    let state = BrokerBuilder {
        settings,
        sessions: sessions.clone(),
        translations: translations.clone(),
        stt: Arc::new(stt),
        translator: Arc::new(translator),
        tts,
        transcoder: Arc::new(DecliningTranscoder),
    }
    .build();

    Harness {
        state,
        sessions,
        translations,
    }
}

impl Harness {
    fn default() -> Self {
        build_harness(test_settings(), StubTranslator::new(), StubStt(""))
    }

    /// Mirror of the accept path: fresh ids, registry entry, sink.
    fn connect(&self, code: Option<&str>, two_way: bool) -> (ConnectionId, SessionId, Arc<RecordingSink>) {
        let connection_id = ConnectionId::generate();
        let session_id = SessionId::generate();
        let sink = RecordingSink::new();
        self.state.core.registry.add(
            connection_id.clone(),
            session_id.clone(),
            sink.clone(),
            code.map(String::from),
            two_way,
        );
        (connection_id, session_id, sink)
    }

    fn connect_with_sink(
        &self,
        sink: Arc<RecordingSink>,
        code: Option<&str>,
    ) -> (ConnectionId, SessionId) {
        let connection_id = ConnectionId::generate();
        let session_id = SessionId::generate();
        self.state.core.registry.add(
            connection_id.clone(),
            session_id.clone(),
            sink,
            code.map(String::from),
            false,
        );
        (connection_id, session_id)
    }

    async fn dispatch(&self, connection: &ConnectionId, frame: Value) {
        self.state
            .dispatcher
            .dispatch(connection, &frame.to_string())
            .await;
    }

    async fn register_teacher(
        &self,
        connection: &ConnectionId,
        language: &str,
        teacher_id: Option<&str>,
    ) {
        let mut frame = json!({
            "type": "register",
            "role": "teacher",
            "languageCode": language,
        });
        if let Some(id) = teacher_id {
            frame["teacherId"] = json!(id);
        }
        self.dispatch(connection, frame).await;
    }

    async fn register_student(&self, connection: &ConnectionId, language: &str) {
        self.dispatch(
            connection,
            json!({
                "type": "register",
                "role": "student",
                "languageCode": language,
            }),
        )
        .await;
    }

    fn session_of(&self, connection: &ConnectionId) -> SessionId {
        self.state
            .core
            .registry
            .snapshot(connection)
            .unwrap()
            .session_id
    }
}

fn classroom_code(sink: &RecordingSink) -> (String, String) {
    let msg = sink
        .last_of_type("classroom_code")
        .expect("no classroom_code message");
    (
        msg["code"].as_str().unwrap().to_string(),
        msg["sessionId"].as_str().unwrap().to_string(),
    )
}

// ---------------------------------------------------------------------------
// Happy path fan-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_fanout() {
    let h = Harness::default();

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;

    let ack = teacher_sink.last_of_type("register").unwrap();
    assert_eq!(ack["status"], "success");
    assert_eq!(ack["data"]["role"], "teacher");
    assert_eq!(ack["data"]["languageCode"], "en-US");

    let (code, session_id) = classroom_code(&teacher_sink);
    assert_eq!(code.len(), 6);
    assert!(code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));

    let (student_a, _, sink_a) = h.connect(Some(&code), false);
    h.register_student(&student_a, "es-ES").await;
    let (student_b, _, sink_b) = h.connect(Some(&code), false);
    h.register_student(&student_b, "fr-FR").await;

    // Both students migrated onto the teacher's session
    assert_eq!(h.session_of(&student_a).to_string(), session_id);
    assert_eq!(h.session_of(&student_b).to_string(), session_id);

    // Teacher saw joins and the count reach 2
    assert_eq!(teacher_sink.messages_of_type("student_joined").len(), 2);
    let count = teacher_sink.last_of_type("studentCountUpdate").unwrap();
    assert_eq!(count["count"], 2);

    h.dispatch(&teacher, json!({"type": "transcription", "text": "Hello world"}))
        .await;

    let a = sink_a.last_of_type("translation").expect("student A translation");
    assert_eq!(a["text"], "Hola mundo");
    assert_eq!(a["originalText"], "Hello world");
    assert_eq!(a["sourceLanguage"], "en-US");
    assert_eq!(a["targetLanguage"], "es-ES");
    assert!(!a["audioData"].as_str().unwrap().is_empty());

    let b = sink_b.last_of_type("translation").expect("student B translation");
    assert_eq!(b["text"], "Bonjour le monde");
    assert_eq!(b["targetLanguage"], "fr-FR");

    // Teacher receives no translation
    assert!(teacher_sink.messages_of_type("translation").is_empty());

    // Latency sanity
    for msg in [&a, &b] {
        let total = msg["latency"]["total"].as_u64().unwrap();
        let translation = msg["latency"]["components"]["translation"].as_u64().unwrap();
        assert!(total >= translation);
    }

    // Post-delivery persistence
    let session = SessionId::from(session_id.as_str());
    assert_eq!(h.translations.count_for_session(&session).await.unwrap(), 2);
    let row = h.sessions.get(&session).await.unwrap().unwrap();
    assert_eq!(row.total_translations, 2);
    assert_eq!(row.transcript_count, 1);
}

// ---------------------------------------------------------------------------
// Invalid classroom
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_classroom_rejected() {
    let h = Harness::default();

    let (student, _, sink) = h.connect(Some("ZZZZZZ"), false);
    h.register_student(&student, "es-ES").await;

    let error = sink.last_of_type("error").expect("error message");
    assert_eq!(error["code"], "INVALID_CLASSROOM");

    // Close 1008 within the configured delay plus slack
    tokio::time::sleep(Duration::from_millis(150)).await;
    let closes = sink.closes();
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].0, 1008);

    // Not counted as a student anywhere
    assert_eq!(h.state.core.registry.snapshot(&student).unwrap().student_counted, false);
}

// ---------------------------------------------------------------------------
// Session expiration mid-flight
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_session_rejected_mid_flight() {
    let h = Harness::default();

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;
    let (code, session_id) = classroom_code(&teacher_sink);

    let (student, _, student_sink) = h.connect(Some(&code), false);
    h.register_student(&student, "es-ES").await;

    // Reaper (or admin) ends the session
    let session = SessionId::from(session_id.as_str());
    h.sessions
        .end_session(&session, SessionQuality::NoActivity, None, chrono::Utc::now())
        .await
        .unwrap();

    h.dispatch(&teacher, json!({"type": "transcription", "text": "anyone there?"}))
        .await;

    let expired = teacher_sink.last_of_type("session_expired").unwrap();
    assert_eq!(expired["code"], "SESSION_EXPIRED");

    tokio::time::sleep(Duration::from_millis(200)).await;
    let closes = teacher_sink.closes();
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].0, 1008);

    assert!(student_sink.messages_of_type("translation").is_empty());
}

// ---------------------------------------------------------------------------
// Teacher reconnect within grace
// ---------------------------------------------------------------------------

#[tokio::test]
async fn teacher_reconnect_resumes_active_session() {
    let h = Harness::default();

    let (teacher, _, sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", Some("T1")).await;
    let (code, session_id) = classroom_code(&sink);

    // Teacher drops; the session row stays active
    disconnect(&h.state, &teacher).await;

    let (again, accept_session, sink2) = h.connect(None, false);
    assert_ne!(accept_session.to_string(), session_id);
    h.register_teacher(&again, "en-US", Some("T1")).await;

    let (code2, session_id2) = classroom_code(&sink2);
    assert_eq!(session_id2, session_id, "resumes the same session");
    assert_eq!(code2, code, "persisted code wins");
    assert_eq!(h.session_of(&again).to_string(), session_id);

    // The old session was not ended as a side effect
    let row = h
        .sessions
        .get(&SessionId::from(session_id.as_str()))
        .await
        .unwrap()
        .unwrap();
    assert!(row.is_active);
}

#[tokio::test]
async fn teacher_reconnect_reactivates_ended_session() {
    let h = Harness::default();

    let (teacher, _, sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", Some("T1")).await;
    let (code, session_id) = classroom_code(&sink);
    let session = SessionId::from(session_id.as_str());
    disconnect(&h.state, &teacher).await;

    // The reaper got there first, but only just
    h.sessions
        .end_session(&session, SessionQuality::NoActivity, None, chrono::Utc::now())
        .await
        .unwrap();
    h.state.core.codes.clear_for_session(&session);

    let (again, _, sink2) = h.connect(None, false);
    h.register_teacher(&again, "en-US", Some("T1")).await;

    let (code2, session_id2) = classroom_code(&sink2);
    assert_eq!(session_id2, session_id);
    assert_eq!(code2, code);

    let row = h.sessions.get(&session).await.unwrap().unwrap();
    assert!(row.is_active);
    assert!(row.end_time.is_none());
}

// ---------------------------------------------------------------------------
// Translation provider failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn translation_failure_falls_back_to_source() {
    let h = build_harness(test_settings(), StubTranslator::failing_for("es-ES"), StubStt(""));

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;
    let (code, _) = classroom_code(&teacher_sink);

    let (student, _, sink) = h.connect(Some(&code), false);
    h.register_student(&student, "es-ES").await;

    h.dispatch(&teacher, json!({"type": "transcription", "text": "Hello world"}))
        .await;

    let msg = sink.last_of_type("translation").expect("fallback translation");
    assert_eq!(msg["text"], "Hello world");
    assert_eq!(msg["originalText"], "Hello world");
    let translation_ms = msg["latency"]["components"]["translation"].as_u64().unwrap();
    assert!(translation_ms < 60_000);
}

// ---------------------------------------------------------------------------
// Dead-session classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dead_session_classification() {
    use classbridge_server::classify;
    use classbridge_storage::SessionRecord;

    let now = chrono::Utc::now();

    let mut rec = SessionRecord::new("s".into(), now - chrono::Duration::seconds(10));
    rec.end_time = Some(now);
    let c = classify(&rec, now);
    assert!(!c.is_real);
    assert_eq!(c.reason, SessionQuality::TooShort);

    let mut rec = SessionRecord::new("s".into(), now - chrono::Duration::seconds(40));
    rec.end_time = Some(now);
    assert_eq!(classify(&rec, now).reason, SessionQuality::NoStudents);

    let mut rec = SessionRecord::new("s".into(), now - chrono::Duration::seconds(120));
    rec.end_time = Some(now);
    rec.students_count = 2;
    assert_eq!(classify(&rec, now).reason, SessionQuality::NoActivity);
}

// ---------------------------------------------------------------------------
// Invariants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn role_lock_survives_re_register() {
    let h = Harness::default();
    let (conn, _, sink) = h.connect(None, false);
    h.register_teacher(&conn, "en-US", None).await;

    // A student register on the same connection is silently dropped
    h.register_student(&conn, "es-ES").await;
    let snap = h.state.core.registry.snapshot(&conn).unwrap();
    assert_eq!(snap.role.as_str(), "teacher");

    // Language may still change via a second teacher register
    h.register_teacher(&conn, "en-GB", None).await;
    let snap = h.state.core.registry.snapshot(&conn).unwrap();
    assert_eq!(snap.language, LanguageTag::new("en-GB"));
    assert!(sink.last_of_type("register").is_some());
}

#[tokio::test]
async fn student_counted_once_across_re_registers() {
    let h = Harness::default();

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;
    let (code, session_id) = classroom_code(&teacher_sink);

    let (student, _, _sink) = h.connect(Some(&code), false);
    h.register_student(&student, "es-ES").await;
    h.register_student(&student, "es-ES").await;
    h.register_student(&student, "es-ES").await;

    let row = h
        .sessions
        .get(&SessionId::from(session_id.as_str()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.students_count, 1);
}

#[tokio::test]
async fn last_student_leaving_sets_grace_marker() {
    let h = Harness::default();

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;
    let (code, session_id) = classroom_code(&teacher_sink);
    let session = SessionId::from(session_id.as_str());

    let (student, _, _sink) = h.connect(Some(&code), false);
    h.register_student(&student, "es-ES").await;

    let row = h.sessions.get(&session).await.unwrap().unwrap();
    assert!(row.quality_reason.is_none());

    disconnect(&h.state, &student).await;

    let row = h.sessions.get(&session).await.unwrap().unwrap();
    assert_eq!(row.students_count, 0);
    assert!(row.quality_reason.is_some(), "grace marker set");
    assert!(row.is_active, "session still in its grace period");

    let update = teacher_sink.last_of_type("studentCountUpdate").unwrap();
    assert_eq!(update["count"], 0);
}

#[tokio::test]
async fn failed_send_never_persists_a_translation() {
    let h = Harness::default();

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;
    let (code, session_id) = classroom_code(&teacher_sink);

    // This student's socket is dead for more sends than the retry budget
    let broken = RecordingSink::failing(10);
    let (student, _) = h.connect_with_sink(broken.clone(), Some(&code));
    h.register_student(&student, "es-ES").await;

    let healthy = RecordingSink::new();
    let (student2, _) = h.connect_with_sink(healthy.clone(), Some(&code));
    h.register_student(&student2, "fr-FR").await;

    h.dispatch(&teacher, json!({"type": "transcription", "text": "Hello world"}))
        .await;

    // The healthy student got their translation; the broken one's failure
    // did not leak a row
    assert_eq!(healthy.messages_of_type("translation").len(), 1);
    let session = SessionId::from(session_id.as_str());
    let rows = h.translations.all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].session_id, session);
    assert_eq!(rows[0].target_language, LanguageTag::new("fr-FR"));
}

// ---------------------------------------------------------------------------
// Protocol odds and ends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_answers_pong_and_revives_connection() {
    let h = Harness::default();
    let (conn, _, sink) = h.connect(None, false);

    h.state.core.registry.set_alive(&conn, false);
    h.dispatch(&conn, json!({"type": "ping", "timestamp": 41})).await;

    let pong = sink.last_of_type("pong").unwrap();
    assert_eq!(pong["originalTimestamp"], 41);
    assert!(h.state.core.registry.snapshot(&conn).unwrap().is_alive);
}

#[tokio::test]
async fn malformed_frames_keep_the_connection_open() {
    let h = Harness::default();
    let (conn, _, sink) = h.connect(None, false);

    h.state
        .dispatcher
        .dispatch(&conn, "this is not json")
        .await;
    h.state
        .dispatcher
        .dispatch(&conn, r#"{"noType": true}"#)
        .await;
    h.dispatch(&conn, json!({"type": "no_such_type"})).await;

    assert!(h.state.core.registry.snapshot(&conn).is_some());
    assert!(sink.closes().is_empty());
}

#[tokio::test]
async fn settings_broadcast_manual_mode_to_students() {
    let h = Harness::default();

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;
    let (code, _) = classroom_code(&teacher_sink);

    let (student, _, student_sink) = h.connect(Some(&code), false);
    h.register_student(&student, "es-ES").await;

    h.dispatch(
        &teacher,
        json!({"type": "settings", "settings": {"translationMode": "manual"}}),
    )
    .await;

    let ack = teacher_sink.last_of_type("settings").unwrap();
    assert_eq!(ack["status"], "success");
    assert_eq!(ack["settings"]["translationMode"], "manual");

    let mode = student_sink.last_of_type("teacher_mode").unwrap();
    assert_eq!(mode["mode"], "manual");

    // Manual mode suppresses the automatic fan-out
    h.dispatch(&teacher, json!({"type": "transcription", "text": "Hello world"}))
        .await;
    assert!(student_sink.messages_of_type("translation").is_empty());

    // send_translation still fans out
    h.dispatch(&teacher, json!({"type": "send_translation", "text": "Hello world"}))
        .await;
    assert_eq!(student_sink.messages_of_type("translation").len(), 1);
    let ack = teacher_sink.last_of_type("manual_send_ack").unwrap();
    assert_eq!(ack["status"], "ok");
}

#[tokio::test]
async fn two_way_request_and_private_reply() {
    let h = Harness::default();

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;
    let (code, _) = classroom_code(&teacher_sink);

    let (student_a, _, sink_a) = h.connect(Some(&code), false);
    h.register_student(&student_a, "es-ES").await;
    let (student_b, _, sink_b) = h.connect(Some(&code), false);
    h.register_student(&student_b, "fr-FR").await;

    h.dispatch(
        &student_a,
        json!({"type": "student_request", "text": "Please repeat"}),
    )
    .await;

    let request = teacher_sink.last_of_type("student_request").unwrap();
    assert_eq!(request["payload"]["text"], "Please repeat");
    let request_id = request["payload"]["requestId"].as_str().unwrap().to_string();

    h.dispatch(
        &teacher,
        json!({
            "type": "teacher_reply",
            "scope": "private",
            "requestId": request_id,
            "text": "Of course",
        }),
    )
    .await;

    // Only the requesting student hears the private reply
    assert_eq!(sink_a.messages_of_type("translation").len(), 1);
    assert!(sink_b.messages_of_type("translation").is_empty());
    let reply = sink_a.last_of_type("translation").unwrap();
    assert_eq!(reply["targetLanguage"], "es-ES");
}

#[tokio::test]
async fn student_requests_are_rate_limited() {
    let h = Harness::default();

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;
    let (code, _) = classroom_code(&teacher_sink);

    let (student, _, student_sink) = h.connect(Some(&code), false);
    h.register_student(&student, "es-ES").await;

    for i in 0..4 {
        h.dispatch(
            &student,
            json!({"type": "student_request", "text": format!("q{i}")}),
        )
        .await;
    }

    // Default limit is 3 per window; the 4th bounces
    assert_eq!(teacher_sink.messages_of_type("student_request").len(), 3);
    let error = student_sink.last_of_type("error").unwrap();
    assert_eq!(error["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn audio_frame_short_buffers_dropped_and_final_fans_out() {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    let h = build_harness(test_settings(), StubTranslator::new(), StubStt("Hello world"));

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;
    let (code, _) = classroom_code(&teacher_sink);

    let (student, _, sink) = h.connect(Some(&code), false);
    h.register_student(&student, "es-ES").await;

    // Too short: dropped before STT
    h.dispatch(&teacher, json!({"type": "audio", "data": "dGlueQ=="}))
        .await;
    assert!(sink.messages_of_type("translation").is_empty());

    // Big enough: transcribed and fanned out
    let audio = BASE64.encode(vec![0u8; 2048]);
    h.dispatch(&teacher, json!({"type": "audio", "data": audio, "isFinalChunk": true}))
        .await;
    let msg = sink.last_of_type("translation").unwrap();
    assert_eq!(msg["text"], "Hola mundo");
}

// ---------------------------------------------------------------------------
// Health monitoring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_sweep_pings_then_terminates_silent_peers() {
    use classbridge_server::HealthMonitor;

    let h = Harness::default();
    let (responsive, _, responsive_sink) = h.connect(None, false);
    let (silent, _, silent_sink) = h.connect(None, false);

    let monitor = HealthMonitor::new(h.state.core.clone());

    // First sweep: everyone was alive, so both get flagged and pinged
    monitor.sweep().await;
    assert_eq!(responsive_sink.pings.load(Ordering::SeqCst), 1);
    assert_eq!(silent_sink.pings.load(Ordering::SeqCst), 1);
    assert!(responsive_sink.last_of_type("ping").is_some());
    assert!(!h.state.core.registry.snapshot(&silent).unwrap().is_alive);

    // One peer answers
    h.dispatch(&responsive, json!({"type": "pong"})).await;

    // Second sweep: the silent peer is terminated, the responsive one is
    // re-flagged and pinged again
    monitor.sweep().await;
    assert!(silent_sink.terminated.load(Ordering::SeqCst));
    assert!(!responsive_sink.terminated.load(Ordering::SeqCst));
    assert_eq!(responsive_sink.pings.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// Supervisor shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_closes_peers_with_normal_code() {
    use classbridge_server::Supervisor;

    let h = Harness::default();
    let (_teacher, _, teacher_sink) = h.connect(None, false);
    let (_student, _, student_sink) = h.connect(None, false);

    let supervisor = Supervisor::start(h.state.core.clone());
    supervisor.shutdown().await;

    for sink in [&teacher_sink, &student_sink] {
        let closes = sink.closes();
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].0, 1000);
        assert_eq!(closes[0].1, "Server shutting down");
    }
}

// ---------------------------------------------------------------------------
// Classroom code expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_codes_are_swept_and_rejected() {
    let mut settings = test_settings();
    settings.timeouts.classroom_code_expiration_ms = 0;
    let h = build_harness(settings, StubTranslator::new(), StubStt(""));

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;
    let (code, _) = classroom_code(&teacher_sink);

    // Born expired under a zero lifetime
    assert!(!h.state.core.codes.is_valid(&code));
    assert_eq!(h.state.core.codes.sweep_expired(), 1);

    let (student, _, sink) = h.connect(Some(&code), false);
    h.register_student(&student, "es-ES").await;
    let error = sink.last_of_type("error").unwrap();
    assert_eq!(error["code"], "INVALID_CLASSROOM");
}

// ---------------------------------------------------------------------------
// Interim transcription
// ---------------------------------------------------------------------------

#[tokio::test]
async fn interim_audio_is_throttled_and_teacher_only() {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    let mut settings = test_settings();
    settings.features.interim_transcription = true;
    let h = build_harness(settings, StubTranslator::new(), StubStt("partial words"));

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;
    let (code, _) = classroom_code(&teacher_sink);

    let (student, _, student_sink) = h.connect(Some(&code), false);
    h.register_student(&student, "es-ES").await;

    let chunk = BASE64.encode(vec![0u8; 512]);
    for _ in 0..3 {
        h.dispatch(
            &teacher,
            json!({"type": "audio", "data": chunk, "isFinalChunk": false}),
        )
        .await;
    }

    // Throttle admits only the first within the window
    let interims = teacher_sink.messages_of_type("transcription");
    assert_eq!(interims.len(), 1);
    assert_eq!(interims[0]["isFinal"], false);
    assert_eq!(interims[0]["text"], "partial words");

    // Interim results never reach students
    assert!(student_sink.messages_of_type("transcription").is_empty());
    assert!(student_sink.messages_of_type("translation").is_empty());
}

#[tokio::test]
async fn interim_audio_dropped_when_feature_disabled() {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    // Default settings leave interim transcription off
    let h = build_harness(test_settings(), StubTranslator::new(), StubStt("anything"));

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;

    let chunk = BASE64.encode(vec![0u8; 512]);
    h.dispatch(
        &teacher,
        json!({"type": "audio", "data": chunk, "isFinalChunk": false}),
    )
    .await;

    assert!(teacher_sink.messages_of_type("transcription").is_empty());
}

// ---------------------------------------------------------------------------
// On-demand TTS
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tts_request_round_trip() {
    let h = Harness::default();
    let (conn, _, sink) = h.connect(None, false);
    h.register_teacher(&conn, "en-US", None).await;

    h.dispatch(
        &conn,
        json!({"type": "tts_request", "text": "Buenos dias", "languageCode": "es-ES"}),
    )
    .await;

    let response = sink.last_of_type("tts_response").unwrap();
    assert_eq!(response["status"], "success");
    assert_eq!(response["text"], "Buenos dias");
    assert_eq!(response["languageCode"], "es-ES");
    assert!(!response["audioData"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn tts_request_rejects_empty_fields() {
    let h = Harness::default();
    let (conn, _, sink) = h.connect(None, false);
    h.register_teacher(&conn, "en-US", None).await;

    h.dispatch(
        &conn,
        json!({"type": "tts_request", "text": "", "languageCode": "es-ES"}),
    )
    .await;

    let response = sink.last_of_type("tts_response").unwrap();
    assert_eq!(response["status"], "error");
    assert_eq!(response["error"]["code"], "INVALID_REQUEST");
}

// ---------------------------------------------------------------------------
// Two-way edge cases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn student_request_without_teacher_registers_route() {
    let h = Harness::default();

    // Student alone in a fresh session (no classroom code, no teacher)
    let (student, _, student_sink) = h.connect(None, false);
    h.register_student(&student, "es-ES").await;

    h.dispatch(
        &student,
        json!({"type": "student_request", "text": "Is anyone there?"}),
    )
    .await;

    // The route is parked for a teacher who may still appear; the student
    // is not bounced
    assert_eq!(h.state.core.routing.len(), 1);
    assert!(student_sink.messages_of_type("error").is_empty());

    // Give the background retry time to give up quietly
    tokio::time::sleep(Duration::from_millis(700)).await;
}

#[tokio::test]
async fn comprehension_signal_requires_opt_in() {
    let h = Harness::default();

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;
    let (code, _) = classroom_code(&teacher_sink);

    let (student, _, _sink) = h.connect(Some(&code), false);
    h.register_student(&student, "es-ES").await;

    // Not opted in: dropped
    h.dispatch(
        &student,
        json!({"type": "comprehension_signal", "signal": "confused"}),
    )
    .await;
    assert!(teacher_sink.messages_of_type("comprehension_signal").is_empty());

    // Opt in, then the relay goes through verbatim
    h.dispatch(
        &student,
        json!({"type": "settings", "settings": {"allowComprehensionSignals": true}}),
    )
    .await;
    h.dispatch(
        &student,
        json!({"type": "comprehension_signal", "signal": "confused"}),
    )
    .await;

    let relayed = teacher_sink.last_of_type("comprehension_signal").unwrap();
    assert_eq!(relayed["signal"], "confused");
    // Teacher has not opted into hints
    assert!(teacher_sink.messages_of_type("ace_hint").is_empty());
}

#[tokio::test]
async fn confused_signal_hints_ace_enabled_teachers() {
    let h = Harness::default();

    let (teacher, _, teacher_sink) = h.connect(None, false);
    h.register_teacher(&teacher, "en-US", None).await;
    h.dispatch(
        &teacher,
        json!({"type": "settings", "settings": {"aceEnabled": true}}),
    )
    .await;
    let (code, _) = classroom_code(&teacher_sink);

    let (student, _, _sink) = h.connect(Some(&code), false);
    h.register_student(&student, "es-ES").await;
    h.dispatch(
        &student,
        json!({"type": "settings", "settings": {"allowComprehensionSignals": true}}),
    )
    .await;

    h.dispatch(
        &student,
        json!({"type": "comprehension_signal", "signal": "confused"}),
    )
    .await;

    assert_eq!(teacher_sink.messages_of_type("ace_hint").len(), 1);
}

// ---------------------------------------------------------------------------
// Startup analytics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn classify_recent_reports_newest_first() {
    let h = Harness::default();
    let now = chrono::Utc::now();

    for (id, age_secs) in [("older", 600), ("newer", 60)] {
        let record = classbridge_storage::SessionRecord::new(
            SessionId::from(id),
            now - chrono::Duration::seconds(age_secs),
        );
        h.sessions.create(record).await.unwrap();
    }

    let classified = h.state.core.lifecycle.classify_recent(10, now).await;
    assert_eq!(classified.len(), 2);
    assert_eq!(classified[0].0.session_id, SessionId::from("newer"));
    assert!(!classified[0].1.is_real);
    assert_eq!(classified[1].1.reason, SessionQuality::NoStudents);
}
