//! Tests for the machine-initiated operations.

#![allow(clippy::unwrap_used)]

use chrono::TimeDelta;
use turku_core::db::to_unix;

use super::ApiError;
use super::test_helpers::*;
use super::types::{AgentRequest, MachineCredentials, SourceConfig, UpdateConfigRequest};
use crate::auth::RegistrationAuth;
use crate::storage::FilterSet;

#[tokio::test]
async fn registration_binds_to_storage() {
    let (broker, _clock) = setup().await;
    register_storage(&broker, STORAGE_NAME, 1000).await;

    let resp = broker
        .update_config(update_request(machine_config(&[(
            "etc",
            source_config("/etc", "daily"),
        )])))
        .await
        .unwrap();

    assert_eq!(resp.storage_name, STORAGE_NAME);
    assert_eq!(resp.ssh_ping_host, "storage-01.example.com");
    assert_eq!(resp.ssh_ping_host_keys, vec!["ssh-ed25519 AAAAstorage"]);
    assert_eq!(resp.ssh_ping_port, 22);

    let machine = stored_machine(&broker).await;
    assert_eq!(machine.unit_name, "web/0");
    assert_eq!(machine.environment_name.as_deref(), Some("prod"));
    assert_eq!(machine.auth_id, "auth-m");
    assert_eq!(machine.date_registered, to_unix(start()));
    assert!(machine.published);

    let sources = broker.db().list_sources_for_machine(&machine.id).await.unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].path, "/etc");
    // New sources are due immediately.
    assert_eq!(sources[0].date_next_backup, to_unix(start()));
}

#[tokio::test]
async fn repeated_update_config_changes_nothing() {
    let sources = [
        ("etc", source_config("/etc", "daily")),
        ("home", source_config("/home", "weekly")),
    ];
    let (broker, clock) = setup_with_machine(&sources).await;
    let machine = stored_machine(&broker).await;
    let before = broker.db().list_sources_for_machine(&machine.id).await.unwrap();

    clock.advance(TimeDelta::hours(1));
    let first = broker
        .update_config(update_request(machine_config(&sources)))
        .await
        .unwrap();
    let second = broker
        .update_config(update_request(machine_config(&sources)))
        .await
        .unwrap();
    assert_eq!(first, second);

    let after_machine = stored_machine(&broker).await;
    assert_eq!(after_machine.revision, machine.revision);
    assert_eq!(after_machine.date_updated, machine.date_updated);

    let after = broker.db().list_sources_for_machine(&machine.id).await.unwrap();
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(a.revision, b.revision);
        assert_eq!(a.date_next_backup, b.date_next_backup);
    }
}

#[tokio::test]
async fn frequency_change_reschedules() {
    let weekly = SourceConfig {
        retention: Some("last 7 days".into()),
        ..source_config("/etc", "weekly")
    };
    let (broker, clock) = setup_with_machine(&[("etc", weekly)]).await;
    clock.advance(TimeDelta::days(2));
    let now = to_unix(broker.now());

    let daily_only = SourceConfig {
        frequency: Some("daily".into()),
        ..SourceConfig::default()
    };
    broker
        .update_config(update_request(machine_config(&[("etc", daily_only)])))
        .await
        .unwrap();

    let machine = stored_machine(&broker).await;
    let source = broker
        .db()
        .get_live_source(&machine.id, "etc")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(source.frequency, "daily");
    assert_eq!(source.path, "/etc");
    assert_eq!(source.retention, "last 7 days");
    assert_eq!(source.date_updated, now);
    assert!(source.date_next_backup > now);
    assert!(source.date_next_backup <= now + 86_400);
}

#[tokio::test]
async fn undeclared_sources_are_unpublished_and_return() {
    let both = [
        ("etc", source_config("/etc", "daily")),
        ("home", source_config("/home", "daily")),
    ];
    let (broker, _clock) = setup_with_machine(&both).await;

    broker
        .update_config(update_request(machine_config(&[(
            "etc",
            source_config("/etc", "daily"),
        )])))
        .await
        .unwrap();

    let checkin = broker.agent_ping_checkin(agent_request()).await.unwrap();
    assert_eq!(
        checkin.scheduled_sources.keys().collect::<Vec<_>>(),
        vec!["etc"]
    );
    // Still enabled, so restores can reach it.
    let restore = broker.agent_ping_restore(agent_request()).await.unwrap();
    assert_eq!(
        restore.machine.sources.keys().collect::<Vec<_>>(),
        vec!["etc", "home"]
    );

    broker
        .update_config(update_request(machine_config(&both)))
        .await
        .unwrap();
    let machine = stored_machine(&broker).await;
    let home = broker.db().get_live_source(&machine.id, "home").await.unwrap();
    assert!(home.is_some_and(|s| s.published));
}

#[tokio::test]
async fn legacy_top_level_sources_are_accepted() {
    let (broker, _clock) = setup().await;
    register_storage(&broker, STORAGE_NAME, 1000).await;

    let mut machine = machine_config(&[]);
    machine.sources = None;
    broker
        .update_config(UpdateConfigRequest {
            auth: machine_reg_auth(),
            machine,
            sources: Some(
                [("var".to_string(), source_config("/var", "daily"))]
                    .into_iter()
                    .collect(),
            ),
        })
        .await
        .unwrap();

    let machine = stored_machine(&broker).await;
    let sources = broker.db().list_sources_for_machine(&machine.id).await.unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name, "var");
}

#[tokio::test]
async fn explicit_null_clears_a_field() {
    let (broker, _clock) = setup_with_machine(&[]).await;
    let mut cfg = machine_config(&[]);
    cfg.environment_name = Some(None);
    broker.update_config(update_request(cfg)).await.unwrap();

    let machine = stored_machine(&broker).await;
    assert_eq!(machine.environment_name, None);
    assert_eq!(machine.service_name.as_deref(), Some("web"));
}

#[tokio::test]
async fn registration_needs_valid_auth() {
    let (broker, _clock) = setup().await;
    register_storage(&broker, STORAGE_NAME, 1000).await;

    let bad_auths = [
        None,
        Some(RegistrationAuth::Named {
            name: Some("machines".into()),
            secret: Some("wrong".into()),
        }),
        // A storage credential cannot register machines.
        Some(RegistrationAuth::Named {
            name: Some("storages".into()),
            secret: Some(STORAGE_REG_SECRET.into()),
        }),
        Some(RegistrationAuth::Named {
            name: Some("machines".into()),
            secret: None,
        }),
    ];
    for auth in bad_auths {
        let err = broker
            .update_config(UpdateConfigRequest {
                auth,
                machine: machine_config(&[]),
                sources: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadAuth), "{err:?}");
    }
    assert!(
        broker
            .db()
            .get_machine_by_uuid(MACHINE_UUID)
            .await
            .unwrap()
            .is_none()
    );

    // The deprecated bare form still works.
    broker
        .update_config(UpdateConfigRequest {
            auth: Some(RegistrationAuth::Legacy(MACHINE_REG_SECRET.into())),
            machine: machine_config(&[]),
            sources: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn existing_machine_with_wrong_secret_is_rejected() {
    let (broker, _clock) = setup_with_machine(&[]).await;
    let mut cfg = machine_config(&[]);
    cfg.secret = "not-it".into();
    cfg.unit_name = Some("hijacked".into());

    let err = broker.update_config(update_request(cfg)).await.unwrap_err();
    assert!(matches!(err, ApiError::BadAuth));
    assert_eq!(stored_machine(&broker).await.unit_name, "web/0");
}

#[tokio::test]
async fn disabled_machine_is_not_reregistered() {
    let (broker, _clock) = setup_with_machine(&[]).await;
    let mut machine = stored_machine(&broker).await;
    machine.active = false;
    broker.db().update_machine(&machine).await.unwrap();

    let err = broker
        .update_config(update_request(machine_config(&[])))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadAuth));
    let err = broker.agent_ping_restore(agent_request()).await.unwrap_err();
    assert!(matches!(err, ApiError::BadAuth));
}

#[tokio::test]
async fn no_live_storage_is_a_capacity_error() {
    let (broker, _clock) = setup().await;
    let err = broker
        .update_config(update_request(machine_config(&[])))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Capacity));
    assert_eq!(err.status().as_u16(), 404);

    // Auth is checked before capacity.
    let err = broker
        .update_config(UpdateConfigRequest {
            auth: None,
            machine: machine_config(&[]),
            sources: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadAuth));
}

#[tokio::test]
async fn invalid_machine_fields_are_rejected() {
    let (broker, _clock) = setup().await;
    register_storage(&broker, STORAGE_NAME, 1000).await;

    let mut cfg = machine_config(&[]);
    cfg.ssh_public_key = None;
    let err = broker.update_config(update_request(cfg)).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(ref v) if v.field == "ssh_public_key"));

    let mut cfg = machine_config(&[]);
    cfg.uuid = "not-a-uuid".into();
    let err = broker.update_config(update_request(cfg)).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(ref v) if v.field == "uuid"));

    let err = broker
        .update_config(update_request(machine_config(&[(
            "etc",
            source_config("/etc", "daily, 25:00"),
        )])))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(ref v) if v.field == "frequency"));

    let err = broker
        .update_config(update_request(machine_config(&[(
            "etc",
            source_config("/etc", "cron 0 0 30 feb *"),
        )])))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(ref v) if v.field == "frequency"));
}

#[tokio::test]
async fn unsatisfiable_frequency_change_keeps_the_old_schedule() {
    let (broker, _clock) = setup_with_machine(&[("etc", source_config("/etc", "daily"))]).await;

    let err = broker
        .update_config(update_request(machine_config(&[(
            "etc",
            source_config("/etc", "cron 0 0 31 apr,jun *"),
        )])))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(ref v) if v.field == "frequency"));

    let machine = stored_machine(&broker).await;
    let source = broker
        .db()
        .get_live_source(&machine.id, "etc")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(source.frequency, "daily");
}

#[tokio::test]
async fn checkin_returns_due_sources_with_filters() {
    let etc = SourceConfig {
        filter: Some(vec!["merge common".into(), "- /etc/shadow".into()]),
        exclude: Some(vec!["*.bak".into()]),
        ..source_config("/etc", "daily")
    };
    let (broker, _clock) = setup().await;
    broker
        .db()
        .insert_filter_set(&FilterSet {
            id: "fs1".into(),
            name: "common".into(),
            filters: r#"["- /tmp", "- /proc"]"#.into(),
            comment: None,
            active: true,
            date_added: 0,
        })
        .await
        .unwrap();
    register_storage(&broker, STORAGE_NAME, 1000).await;
    broker
        .update_config(update_request(machine_config(&[("etc", etc)])))
        .await
        .unwrap();

    let resp = broker.agent_ping_checkin(agent_request()).await.unwrap();
    assert_eq!(resp.machine.scheduled_sources, resp.scheduled_sources);
    let etc = &resp.scheduled_sources["etc"];
    assert_eq!(etc.path, "/etc");
    assert_eq!(etc.filter, vec!["- /tmp", "- /proc", "- /etc/shadow"]);
    assert_eq!(etc.exclude, vec!["*.bak"]);
    assert_eq!(etc.storage.name, STORAGE_NAME);

    let machine = stored_machine(&broker).await;
    assert_eq!(machine.date_checked_in, Some(to_unix(start())));
}

#[tokio::test]
async fn sources_not_yet_due_are_not_scheduled() {
    let (broker, _clock) = setup_with_machine(&[("etc", source_config("/etc", "daily"))]).await;
    let machine = stored_machine(&broker).await;
    let mut source = broker
        .db()
        .get_live_source(&machine.id, "etc")
        .await
        .unwrap()
        .unwrap();
    source.date_next_backup = to_unix(start()) + 3600;
    broker.db().update_source(&source).await.unwrap();

    let resp = broker.agent_ping_checkin(agent_request()).await.unwrap();
    assert!(resp.scheduled_sources.is_empty());

    let restore = broker.agent_ping_restore(agent_request()).await.unwrap();
    assert!(restore.machine.sources.contains_key("etc"));
}

#[tokio::test]
async fn unpublished_machine_cannot_check_in() {
    let (broker, _clock) = setup_with_machine(&[("etc", source_config("/etc", "daily"))]).await;
    let mut cfg = machine_config(&[("etc", source_config("/etc", "daily"))]);
    cfg.published = Some(false);
    broker.update_config(update_request(cfg)).await.unwrap();

    let err = broker.agent_ping_checkin(agent_request()).await.unwrap_err();
    assert!(matches!(err, ApiError::BadAuth));
    // Restores still work.
    broker.agent_ping_restore(agent_request()).await.unwrap();
}

#[tokio::test]
async fn agent_auth_failures_look_the_same() {
    let (broker, _clock) = setup_with_machine(&[]).await;
    let unknown = AgentRequest {
        machine: MachineCredentials {
            uuid: "7a1f0c2e-3b4d-4e5f-8a9b-0c1d2e3f4a5b".into(),
            secret: MACHINE_SECRET.into(),
        },
    };
    let wrong = AgentRequest {
        machine: MachineCredentials {
            uuid: MACHINE_UUID.into(),
            secret: "wrong".into(),
        },
    };

    let a = broker.agent_ping_checkin(unknown).await.unwrap_err();
    let b = broker.agent_ping_checkin(wrong).await.unwrap_err();
    assert_eq!(a.to_string(), "Bad auth");
    assert_eq!(a.to_string(), b.to_string());
    assert_eq!(a.status(), b.status());
}
