use serde_json::{Value, json};

fn json_body(schema: &str) -> Value {
    json!({
        "application/json": {
            "schema": { "$ref": format!("#/components/schemas/{schema}") },
        },
    })
}

fn ok(description: &str, schema: &str) -> Value {
    json!({ "description": description, "content": json_body(schema) })
}

fn error(description: &str) -> Value {
    ok(description, "ErrorResponse")
}

pub fn openapi_spec() -> Value {
    json!({
        "openapi": "3.1.0",
        "info": {
            "title": "parley Assistant API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Intent understanding and decision pipeline for a personal assistant.",
        },
        "paths": {
            "/healthz": {
                "get": {
                    "summary": "Health check",
                    "responses": {
                        "200": {
                            "description": "Service health",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "required": ["status", "service", "policy"],
                                        "properties": {
                                            "status": { "type": "string" },
                                            "service": { "type": "string" },
                                            "policy": { "type": "string", "enum": ["fixed", "semantic"] },
                                        },
                                    },
                                },
                            },
                        },
                    },
                },
            },
            "/openapi.json": {
                "get": {
                    "summary": "This document",
                    "responses": {
                        "200": { "description": "OpenAPI 3.1 document" },
                    },
                },
            },
            "/assist": {
                "post": {
                    "summary": "Classify, gate and act on one utterance",
                    "requestBody": { "required": true, "content": json_body("AssistRequest") },
                    "responses": {
                        "200": ok("Pipeline outcome", "AssistResponse"),
                        "500": error("Storage failure"),
                    },
                },
            },
            "/sessions/{session_id}": {
                "get": {
                    "summary": "Read session context",
                    "parameters": [
                        { "$ref": "#/components/parameters/SessionIdPath" },
                    ],
                    "responses": {
                        "200": ok("Session context", "SessionContext"),
                        "404": error("Unknown session"),
                    },
                },
                "delete": {
                    "summary": "Forget a session",
                    "parameters": [
                        { "$ref": "#/components/parameters/SessionIdPath" },
                    ],
                    "responses": {
                        "204": { "description": "Session cleared" },
                        "404": error("Unknown session"),
                    },
                },
            },
            "/sessions/{session_id}/corrections": {
                "post": {
                    "summary": "Correct a misunderstanding and re-dispatch",
                    "parameters": [
                        { "$ref": "#/components/parameters/SessionIdPath" },
                    ],
                    "requestBody": { "required": true, "content": json_body("CorrectionRequest") },
                    "responses": {
                        "200": ok("Decision and outcome of the corrected action", "CorrectionResponse"),
                        "400": error("Blank original text"),
                        "404": error("Unknown session"),
                    },
                },
            },
            "/sessions/{session_id}/events": {
                "get": {
                    "summary": "List journaled pipeline events",
                    "parameters": [
                        { "$ref": "#/components/parameters/SessionIdPath" },
                        {
                            "name": "from_sequence",
                            "in": "query",
                            "required": false,
                            "schema": { "type": "integer", "format": "int64", "minimum": 1 },
                        },
                        {
                            "name": "limit",
                            "in": "query",
                            "required": false,
                            "schema": { "type": "integer", "format": "int32", "minimum": 1, "maximum": 5000 },
                        },
                    ],
                    "responses": {
                        "200": ok("Event page", "EventListResponse"),
                    },
                },
            },
            "/sessions/{session_id}/events/stream": {
                "get": {
                    "summary": "Replay then follow pipeline events (SSE)",
                    "parameters": [
                        { "$ref": "#/components/parameters/SessionIdPath" },
                        {
                            "name": "cursor",
                            "in": "query",
                            "required": false,
                            "description": "Last sequence already seen; replay starts after it.",
                            "schema": { "type": "integer", "format": "int64", "minimum": 0 },
                        },
                        {
                            "name": "replay_limit",
                            "in": "query",
                            "required": false,
                            "schema": { "type": "integer", "format": "int32", "minimum": 1, "maximum": 5000 },
                        },
                    ],
                    "responses": {
                        "200": {
                            "description": "`pipeline.event` frames carrying EventRecord JSON; `stream.lagged` when the subscriber fell behind",
                            "content": {
                                "text/event-stream": {
                                    "schema": { "type": "string" },
                                },
                            },
                        },
                    },
                },
            },
            "/patterns": {
                "get": {
                    "summary": "Learned patterns, most frequent first",
                    "responses": {
                        "200": {
                            "description": "Pattern memory entries",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "array",
                                        "items": { "$ref": "#/components/schemas/PatternMemoryEntry" },
                                    },
                                },
                            },
                        },
                    },
                },
            },
        },
        "components": {
            "parameters": {
                "SessionIdPath": {
                    "name": "session_id",
                    "in": "path",
                    "required": true,
                    "schema": { "type": "string", "minLength": 1 },
                },
            },
            "schemas": {
                "Slots": {
                    "type": "object",
                    "description": "Slot name to text, integer, ISO-8601 datetime or list of strings.",
                    "additionalProperties": true,
                },
                "AssistRequest": {
                    "type": "object",
                    "required": ["text"],
                    "properties": {
                        "text": { "type": "string" },
                        "sessionId": { "type": "string" },
                        "userId": { "type": "string" },
                    },
                },
                "AssistResponse": {
                    "type": "object",
                    "required": [
                        "success", "decision", "intent", "confidence", "slots",
                        "message", "spokenResponse", "sessionId", "rationale",
                    ],
                    "properties": {
                        "success": { "type": "boolean" },
                        "decision": { "type": "string", "enum": ["execute", "confirm", "clarify", "learn", "error"] },
                        "intent": { "type": "string" },
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                        "slots": { "$ref": "#/components/schemas/Slots" },
                        "message": { "type": "string" },
                        "spokenResponse": { "type": "string" },
                        "followUp": { "type": "string" },
                        "sessionId": { "type": "string" },
                        "rationale": { "type": "string" },
                        "data": {},
                    },
                },
                "CorrectionRequest": {
                    "type": "object",
                    "required": ["originalText", "correctedIntent"],
                    "properties": {
                        "originalText": { "type": "string" },
                        "predictedIntent": { "type": "string" },
                        "predictedSlots": { "$ref": "#/components/schemas/Slots" },
                        "correctedIntent": { "type": "string" },
                        "correctedSlots": { "$ref": "#/components/schemas/Slots" },
                        "alwaysApply": { "type": "boolean", "default": false },
                    },
                },
                "Decision": {
                    "type": "object",
                    "required": ["kind", "intent", "slots", "confidence", "provenance", "rationale"],
                    "properties": {
                        "kind": { "type": "string", "enum": ["execute", "confirm", "clarify", "learn", "error"] },
                        "intent": { "type": "string" },
                        "slots": { "$ref": "#/components/schemas/Slots" },
                        "confidence": { "type": "number" },
                        "provenance": { "type": "string", "enum": ["rule", "model", "pattern-memory"] },
                        "rationale": { "type": "string" },
                    },
                },
                "CorrectionResponse": {
                    "type": "object",
                    "required": ["decision", "response"],
                    "properties": {
                        "decision": { "$ref": "#/components/schemas/Decision" },
                        "response": { "$ref": "#/components/schemas/AssistResponse" },
                    },
                },
                "SessionContext": {
                    "type": "object",
                    "required": ["session_id", "turns", "working_memory", "created_at", "last_updated"],
                    "properties": {
                        "session_id": { "type": "string" },
                        "user_id": { "type": "string" },
                        "turns": { "type": "array", "items": { "type": "object" } },
                        "working_memory": { "type": "object" },
                        "corrections": { "type": "array", "items": { "type": "object" } },
                        "pending": { "type": "object" },
                        "summary": { "type": "string" },
                        "created_at": { "type": "string", "format": "date-time" },
                        "last_updated": { "type": "string", "format": "date-time" },
                    },
                },
                "PatternMemoryEntry": {
                    "type": "object",
                    "required": ["key", "intent", "slots", "frequency", "first_seen", "last_seen"],
                    "properties": {
                        "key": { "type": "string" },
                        "intent": { "type": "string" },
                        "slots": { "$ref": "#/components/schemas/Slots" },
                        "frequency": { "type": "integer", "minimum": 1 },
                        "first_seen": { "type": "string", "format": "date-time" },
                        "last_seen": { "type": "string", "format": "date-time" },
                    },
                },
                "EventRecord": {
                    "type": "object",
                    "required": ["event_id", "session_id", "sequence", "timestamp", "event"],
                    "properties": {
                        "event_id": { "type": "string" },
                        "session_id": { "type": "string" },
                        "sequence": { "type": "integer", "format": "int64" },
                        "timestamp": { "type": "string", "format": "date-time" },
                        "event": {
                            "type": "object",
                            "required": ["type"],
                            "properties": {
                                "type": {
                                    "type": "string",
                                    "enum": [
                                        "utterance_received", "intent_classified", "decision_made",
                                        "action_dispatched", "correction_applied", "session_cleared",
                                    ],
                                },
                            },
                        },
                    },
                },
                "EventListResponse": {
                    "type": "object",
                    "required": ["session_id", "from_sequence", "events"],
                    "properties": {
                        "session_id": { "type": "string" },
                        "from_sequence": { "type": "integer", "format": "int64" },
                        "events": {
                            "type": "array",
                            "items": { "$ref": "#/components/schemas/EventRecord" },
                        },
                    },
                },
                "ErrorResponse": {
                    "type": "object",
                    "required": ["error"],
                    "properties": {
                        "error": { "type": "string" },
                    },
                },
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::openapi_spec;

    #[test]
    fn openapi_spec_declares_every_route() {
        let spec = openapi_spec();
        assert_eq!(spec["openapi"], "3.1.0");
        for path in [
            "/healthz",
            "/openapi.json",
            "/assist",
            "/sessions/{session_id}",
            "/sessions/{session_id}/corrections",
            "/sessions/{session_id}/events",
            "/sessions/{session_id}/events/stream",
            "/patterns",
        ] {
            assert!(spec["paths"][path].is_object(), "missing {path}");
        }
        assert!(spec["paths"]["/sessions/{session_id}"]["delete"].is_object());
    }

    #[test]
    fn every_schema_reference_resolves() {
        let spec = openapi_spec();
        let rendered = spec.to_string();
        for reference in rendered.split("#/components/schemas/").skip(1) {
            let name: String = reference.chars().take_while(|c| c.is_alphanumeric()).collect();
            assert!(
                spec["components"]["schemas"][name.as_str()].is_object(),
                "unresolved schema {name}"
            );
        }
    }
}
