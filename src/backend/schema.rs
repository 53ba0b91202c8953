//! Grafana dashboard JSON schema.

use serde_json::{json, Value};

/// Panel types accepted by the schema.
pub const PANEL_TYPES: &[&str] = &[
    "graph",
    "stat",
    "gauge",
    "table",
    "timeseries",
    "heatmap",
    "logs",
    "bar",
    "piechart",
    "text",
    "singlestat",
    "dashlist",
    "alertlist",
    "row",
    "bargauge",
    "barchart",
    "histogram",
    "news",
    "pie",
    "canvas",
    "geomap",
    "xychart",
    "candlestick",
];

fn datasource_schema() -> Value {
    json!({
        "oneOf": [
            {"type": "string"},
            {
                "type": "object",
                "required": ["type", "uid"],
                "properties": {
                    "type": {"type": "string"},
                    "uid": {"type": "string"}
                }
            },
            {"type": "null"}
        ]
    })
}

fn target_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "refId": {"type": "string"},
            "expr": {"type": "string"},
            "format": {"type": "string", "enum": ["time_series", "table", "heatmap", "logs"]},
            "intervalMs": {"type": "integer"},
            "legendFormat": {"type": "string"},
            "datasource": datasource_schema(),
            "rawSql": {"type": "string"},
            "rawQuery": {"type": "boolean"}
        }
    })
}

fn field_config_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "defaults": {
                "type": "object",
                "properties": {
                    "unit": {"type": "string"},
                    "min": {"type": ["number", "null"]},
                    "max": {"type": ["number", "null"]},
                    "decimals": {"type": ["integer", "null"]},
                    "thresholds": {
                        "type": "object",
                        "properties": {
                            "mode": {"type": "string", "enum": ["absolute", "percentage"]},
                            "steps": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "color": {"type": "string"},
                                        "value": {"type": ["number", "null"]}
                                    }
                                }
                            }
                        }
                    },
                    "color": {
                        "type": "object",
                        "properties": {
                            "mode": {
                                "type": "string",
                                "enum": [
                                    "value", "palette-classic", "fixed",
                                    "continuous-GrYlRd", "continuous-RdYlGr", "continuous-BlYlRd"
                                ]
                            }
                        }
                    }
                }
            },
            "overrides": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "matcher": {
                            "type": "object",
                            "properties": {
                                "id": {"type": "string"},
                                "options": {"type": ["string", "object"]}
                            }
                        },
                        "properties": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "id": {"type": "string"},
                                    "value": {"type": ["string", "number", "boolean", "object", "null"]}
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

fn panel_schema() -> Value {
    json!({
        "type": "object",
        "required": ["id", "type", "title"],
        "properties": {
            "id": {"type": "integer"},
            "type": {"type": "string", "enum": PANEL_TYPES},
            "title": {"type": "string"},
            "description": {"type": "string"},
            "gridPos": {
                "type": "object",
                "required": ["h", "w", "x", "y"],
                "properties": {
                    "h": {"type": "integer"},
                    "w": {"type": "integer"},
                    "x": {"type": "integer"},
                    "y": {"type": "integer"}
                }
            },
            "datasource": datasource_schema(),
            "targets": {"type": "array", "items": target_schema()},
            "options": {"type": "object"},
            "fieldConfig": field_config_schema(),
            "links": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "url": {"type": "string"},
                        "targetBlank": {"type": "boolean"}
                    }
                }
            }
        }
    })
}

fn templating_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "list": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "type"],
                    "properties": {
                        "name": {"type": "string"},
                        "type": {
                            "type": "string",
                            "enum": ["query", "custom", "interval", "datasource", "textbox", "constant", "adhoc"]
                        },
                        "query": {"type": ["string", "object"]},
                        "current": {
                            "type": "object",
                            "properties": {
                                "value": {"type": ["string", "array", "null"]},
                                "text": {"type": ["string", "array", "null"]},
                                "selected": {"type": "boolean"}
                            }
                        },
                        "hide": {"type": "integer", "enum": [0, 1, 2]},
                        "label": {"type": ["string", "null"]},
                        "multi": {"type": "boolean"},
                        "includeAll": {"type": "boolean"},
                        "options": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "text": {"type": "string"},
                                    "value": {"type": ["string", "number"]},
                                    "selected": {"type": "boolean"}
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

fn annotations_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "list": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "datasource": {"type": ["object", "string"]},
                        "enable": {"type": "boolean"},
                        "iconColor": {"type": "string"}
                    }
                }
            }
        }
    })
}

/// The dashboard schema generated documents must satisfy.
pub fn grafana_dashboard_schema() -> Value {
    json!({
        "type": "object",
        "required": ["panels", "title"],
        "properties": {
            "id": {"type": "integer"},
            "uid": {"type": "string"},
            "title": {"type": "string"},
            "description": {"type": "string"},
            "tags": {"type": "array", "items": {"type": "string"}},
            "timezone": {"type": "string"},
            "schemaVersion": {"type": "integer"},
            "version": {"type": "integer"},
            "refresh": {"type": ["string", "null"]},
            "time": {
                "type": "object",
                "required": ["from", "to"],
                "properties": {
                    "from": {"type": "string"},
                    "to": {"type": "string"}
                }
            },
            "panels": {"type": "array", "items": panel_schema()},
            "templating": templating_schema(),
            "annotations": annotations_schema()
        }
    })
}
