use {
    super::*,
    crate::{
        client::MockMirrorClient,
        payload::{ObjectVector, RemoveTimestamp, TimestampOperator, UpsertConfig},
        registry::Mirror,
        target::PeerTarget,
        test_utils::{init_logger, location, peer, TestExecutor},
    },
    tonic::Code,
};

pub(crate) const LOCAL: &str = "10.0.0.100:8081";
const IP_A: &str = "10.0.0.1";
const IP_B: &str = "10.0.0.2";
const IP_C: &str = "10.0.0.3";

pub(crate) struct Fixture {
    pub handler: MirrorHandler,
    pub ctx: CallContext,
    pub mirror: Arc<Mirror>,
}

/// A handler whose local cluster and mirror peers `10.0.0.n:8081` are mocks
/// prepared by `configure`.
pub(crate) async fn fixture<F>(peers: &[u8], configure: F) -> Fixture
where
    F: FnOnce(&mut MockMirrorClient, &mut [MockMirrorClient]),
{
    init_logger();
    let mut local = MockMirrorClient::new();
    let mut remotes: Vec<MockMirrorClient> =
        peers.iter().map(|_| MockMirrorClient::new()).collect();
    configure(&mut local, &mut remotes);

    let executor = Arc::new(TestExecutor::default());
    executor.add_connected(LOCAL, local);
    for (n, client) in peers.iter().zip(remotes) {
        executor.add_client(&peer(*n).addr(), client);
    }

    let mut config = MirrorConfig::dev_default();
    config.gateway_addr = LOCAL.to_owned();
    config.self_mirror_addrs = vec!["10.0.0.200:8081".to_owned()];
    let mirror = Arc::new(Mirror::new(
        executor.clone(),
        config.self_targets().unwrap(),
        [LOCAL.to_owned()],
    ));
    let targets: Vec<PeerTarget> = peers.iter().map(|n| peer(*n)).collect();
    if !targets.is_empty() {
        mirror.connect(&CallContext::new(), &targets).await.unwrap();
    }

    let gateway = Arc::new(Gateway::new(
        executor,
        mirror.clone(),
        LOCAL.to_owned(),
        config.forwarded_name().unwrap(),
    ));
    Fixture {
        handler: MirrorHandler::new(gateway, &config),
        ctx: CallContext::new(),
        mirror,
    }
}

pub(crate) fn insert_req(id: &str) -> InsertRequest {
    InsertRequest {
        vector: ObjectVector {
            id: id.to_owned(),
            vector: vec![0.1, 0.2, 0.3],
            timestamp: 0,
        },
        config: InsertConfig {
            skip_strict_exist_check: false,
            timestamp: 42,
        },
    }
}

fn update_req(id: &str) -> UpdateRequest {
    UpdateRequest {
        vector: ObjectVector {
            id: id.to_owned(),
            vector: vec![0.4, 0.5, 0.6],
            timestamp: 0,
        },
        config: UpdateConfig {
            timestamp: 42,
            ..UpdateConfig::default()
        },
    }
}

fn remove_req(id: &str) -> RemoveRequest {
    RemoveRequest {
        id: id.to_owned(),
        ..RemoveRequest::default()
    }
}

pub(crate) fn local_ok(id: &str) -> std::result::Result<ObjectLocation, Status> {
    Ok(location(id, "vald-a", IP_A))
}

// ── Insert ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_insert_all_ok_merges_ips() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_insert()
            .times(1)
            .returning(|_, req| local_ok(&req.vector.id));
        peers[0]
            .expect_insert()
            .times(1)
            .returning(|_, req| Ok(location(&req.vector.id, "vald-b", IP_B)));
    })
    .await;

    let loc = fx
        .handler
        .insert(&fx.ctx, insert_req("vec-1"))
        .await
        .unwrap();
    assert_eq!(loc.uuid, "vec-1");
    assert_eq!(loc.ips, vec![IP_A, IP_B]);
    assert_eq!(loc.name, "vald-a,vald-b");
}

#[tokio::test]
async fn test_insert_already_exists_sends_update_only_to_that_peer() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_insert()
            .times(1)
            .returning(|_, req| local_ok(&req.vector.id));
        local.expect_update().never();
        peers[0]
            .expect_insert()
            .times(1)
            .returning(|_, _| Err(Status::already_exists("exists")));
        peers[0]
            .expect_update()
            .times(1)
            .withf(|ctx, req| {
                ctx.forwarded_for() == Some("mirror-dev")
                    && req.config.timestamp == 42
                    && req.vector.vector == vec![0.1, 0.2, 0.3]
            })
            .returning(|_, req| Ok(location(&req.vector.id, "vald-b", IP_B)));
    })
    .await;

    let loc = fx
        .handler
        .insert(&fx.ctx, insert_req("vec-1"))
        .await
        .unwrap();
    assert_eq!(loc.ips, vec![IP_A, IP_B]);
}

#[tokio::test]
async fn test_insert_compensation_tolerates_already_exists_and_not_found() {
    let fx = fixture(&[2, 3], |local, peers| {
        local
            .expect_insert()
            .returning(|_, req| local_ok(&req.vector.id));
        for (client, code) in peers.iter_mut().zip([Code::AlreadyExists, Code::NotFound]) {
            client
                .expect_insert()
                .returning(|_, _| Err(Status::already_exists("exists")));
            client
                .expect_update()
                .times(1)
                .returning(move |_, _| Err(Status::new(code, "update refused")));
        }
    })
    .await;

    let loc = fx
        .handler
        .insert(&fx.ctx, insert_req("vec-1"))
        .await
        .unwrap();
    assert_eq!(loc.ips, vec![IP_A]);
}

#[tokio::test]
async fn test_insert_compensation_failure() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_insert()
            .returning(|_, req| local_ok(&req.vector.id));
        peers[0]
            .expect_insert()
            .returning(|_, _| Err(Status::already_exists("exists")));
        peers[0]
            .expect_update()
            .returning(|_, _| Err(Status::internal("index broken")));
    })
    .await;

    let err = fx
        .handler
        .insert(&fx.ctx, insert_req("vec-1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);
}

#[tokio::test]
async fn test_insert_all_already_exists() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_insert()
            .returning(|_, _| Err(Status::already_exists("exists")));
        local.expect_update().never();
        peers[0]
            .expect_insert()
            .returning(|_, _| Err(Status::already_exists("exists")));
        peers[0].expect_update().never();
    })
    .await;

    let err = fx
        .handler
        .insert(&fx.ctx, insert_req("vec-1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::AlreadyExists);
    assert_eq!(
        err.message(),
        "Insert API target same vector already exists"
    );
}

#[tokio::test]
async fn test_insert_internal_fails_whole_write() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_insert()
            .returning(|_, req| local_ok(&req.vector.id));
        peers[0]
            .expect_insert()
            .returning(|_, _| Err(Status::internal("index broken")));
    })
    .await;

    let err = fx
        .handler
        .insert(&fx.ctx, insert_req("vec-1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert!(err.message().contains(&peer(2).addr()));
}

#[tokio::test]
async fn test_insert_stamps_one_timestamp_for_all_participants() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_insert()
            .withf(|_, req| {
                req.config.timestamp > 0 && req.vector.timestamp == req.config.timestamp
            })
            .returning(|_, req| local_ok(&req.vector.id));
        peers[0]
            .expect_insert()
            .withf(|_, req| req.config.timestamp > 0)
            .returning(|_, req| Ok(location(&req.vector.id, "vald-b", IP_B)));
    })
    .await;

    let mut req = insert_req("vec-1");
    req.config.timestamp = 0;
    fx.handler.insert(&fx.ctx, req).await.unwrap();
}

#[tokio::test]
async fn test_insert_rejects_empty_id() {
    let fx = fixture(&[], |local, _| {
        local.expect_insert().never();
    })
    .await;
    let err = fx
        .handler
        .insert(&fx.ctx, insert_req(""))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

// ── Loop prevention ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_forwarded_call_only_reaches_local_cluster() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_insert()
            .times(1)
            .returning(|_, _| Err(Status::already_exists("exists")));
        local.expect_update().never();
        peers[0].expect_insert().never();
    })
    .await;

    let ctx = fx.ctx.forwarded(&"mirror-b".parse().unwrap());
    let err = fx
        .handler
        .insert(&ctx, insert_req("vec-1"))
        .await
        .unwrap_err();
    // the local answer is passed through untouched
    assert_eq!(err.code(), Code::AlreadyExists);
    assert_eq!(err.message(), "exists");
}

#[tokio::test]
async fn test_broadcast_marks_calls_as_forwarded() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_remove()
            .withf(|ctx, _| ctx.forwarded_for() == Some("mirror-dev"))
            .returning(|_, req| local_ok(&req.id));
        peers[0]
            .expect_remove()
            .withf(|ctx, _| ctx.forwarded_for() == Some("mirror-dev"))
            .returning(|_, req| Ok(location(&req.id, "vald-b", IP_B)));
    })
    .await;

    fx.handler
        .remove(&fx.ctx, remove_req("vec-1"))
        .await
        .unwrap();
}

// ── Update ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_update_already_exists_is_accepted() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_update()
            .returning(|_, _| Err(Status::already_exists("same vector")));
        local.expect_insert().never();
        peers[0]
            .expect_update()
            .returning(|_, req| Ok(location(&req.vector.id, "vald-b", IP_B)));
        peers[0].expect_insert().never();
    })
    .await;

    let loc = fx
        .handler
        .update(&fx.ctx, update_req("vec-1"))
        .await
        .unwrap();
    assert_eq!(loc.ips, vec![IP_B]);
}

#[tokio::test]
async fn test_update_not_found_sends_insert() {
    let fx = fixture(&[2, 3], |local, peers| {
        local
            .expect_update()
            .returning(|_, req| local_ok(&req.vector.id));
        local.expect_insert().never();
        peers[0]
            .expect_update()
            .returning(|_, _| Err(Status::not_found("missing")));
        peers[0]
            .expect_insert()
            .times(1)
            .withf(|_, req| {
                req.config.timestamp == 42 && req.vector.vector == vec![0.4, 0.5, 0.6]
            })
            .returning(|_, req| Ok(location(&req.vector.id, "vald-b", IP_B)));
        peers[1]
            .expect_update()
            .returning(|_, req| Ok(location(&req.vector.id, "vald-c", IP_C)));
        peers[1].expect_insert().never();
    })
    .await;

    let mut loc = fx
        .handler
        .update(&fx.ctx, update_req("vec-1"))
        .await
        .unwrap();
    loc.ips.sort();
    assert_eq!(loc.ips, vec![IP_A, IP_B, IP_C]);
}

#[tokio::test]
async fn test_update_all_not_found() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_update()
            .returning(|_, _| Err(Status::not_found("missing")));
        local.expect_insert().never();
        peers[0]
            .expect_update()
            .returning(|_, _| Err(Status::not_found("missing")));
        peers[0].expect_insert().never();
    })
    .await;

    let err = fx
        .handler
        .update(&fx.ctx, update_req("vec-1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert_eq!(err.message(), "Update API id vec-1 not found");
}

#[tokio::test]
async fn test_update_compensation_leaves_everything_already_existing() {
    let fx = fixture(&[2, 3], |local, peers| {
        local
            .expect_update()
            .returning(|_, _| Err(Status::already_exists("same vector")));
        peers[0]
            .expect_update()
            .returning(|_, _| Err(Status::not_found("missing")));
        peers[0]
            .expect_insert()
            .times(1)
            .returning(|_, _| Err(Status::already_exists("exists")));
        peers[1]
            .expect_update()
            .returning(|_, _| Err(Status::already_exists("same vector")));
    })
    .await;

    let err = fx
        .handler
        .update(&fx.ctx, update_req("vec-1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::AlreadyExists);
    assert_eq!(
        err.message(),
        "Insert for Update API target same vector already exists"
    );
}

#[tokio::test]
async fn test_update_compensation_failure() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_update()
            .returning(|_, req| local_ok(&req.vector.id));
        peers[0]
            .expect_update()
            .returning(|_, _| Err(Status::not_found("missing")));
        peers[0]
            .expect_insert()
            .returning(|_, _| Err(Status::internal("index broken")));
    })
    .await;

    let err = fx
        .handler
        .update(&fx.ctx, update_req("vec-1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);
}

// ── Upsert ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_upsert() {
    let fx = fixture(&[2], |local, peers| {
        let mut calls = 0;
        local.expect_upsert().returning(move |_, req| {
            calls += 1;
            if calls == 1 {
                Err(Status::already_exists("same vector"))
            } else {
                local_ok(&req.vector.id)
            }
        });
        let mut calls = 0;
        peers[0].expect_upsert().returning(move |_, req| {
            calls += 1;
            if calls == 1 {
                Ok(location(&req.vector.id, "vald-b", IP_B))
            } else {
                Err(Status::internal("index broken"))
            }
        });
    })
    .await;
    let req = UpsertRequest {
        vector: insert_req("vec-1").vector,
        config: UpsertConfig::default(),
    };

    let loc = fx.handler.upsert(&fx.ctx, req.clone()).await.unwrap();
    assert_eq!(loc.ips, vec![IP_B]);

    let err = fx.handler.upsert(&fx.ctx, req).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
}

#[tokio::test]
async fn test_upsert_all_already_exists() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_upsert()
            .returning(|_, _| Err(Status::already_exists("same vector")));
        peers[0]
            .expect_upsert()
            .returning(|_, _| Err(Status::already_exists("same vector")));
    })
    .await;
    let req = UpsertRequest {
        vector: insert_req("vec-1").vector,
        config: UpsertConfig::default(),
    };
    let err = fx.handler.upsert(&fx.ctx, req).await.unwrap_err();
    assert_eq!(err.code(), Code::AlreadyExists);
}

// ── Remove ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_remove_not_found_is_accepted() {
    let fx = fixture(&[2], |local, peers| {
        local.expect_remove().returning(|_, req| local_ok(&req.id));
        peers[0]
            .expect_remove()
            .returning(|_, _| Err(Status::not_found("missing")));
    })
    .await;

    let loc = fx
        .handler
        .remove(&fx.ctx, remove_req("vec-1"))
        .await
        .unwrap();
    assert_eq!(loc.ips, vec![IP_A]);
    assert_eq!(loc.name, "vald-a");
}

#[tokio::test]
async fn test_remove_failures() {
    let fx = fixture(&[2], |local, peers| {
        local.expect_remove().returning(|_, req| {
            if req.id == "gone" {
                Err(Status::not_found("missing"))
            } else {
                local_ok(&req.id)
            }
        });
        peers[0].expect_remove().returning(|_, req| {
            if req.id == "gone" {
                Err(Status::not_found("missing"))
            } else {
                Err(Status::internal("index broken"))
            }
        });
    })
    .await;

    let err = fx
        .handler
        .remove(&fx.ctx, remove_req("gone"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let err = fx
        .handler
        .remove(&fx.ctx, remove_req("vec-1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);
}

#[tokio::test]
async fn test_remove_by_timestamp() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_remove_by_timestamp()
            .returning(|_, _| Err(Status::not_found("nothing older")));
        peers[0].expect_remove_by_timestamp().returning(|_, _| {
            Ok(ObjectLocations {
                locations: vec![
                    location("vec-1", "vald-b", IP_B),
                    location("vec-2", "vald-b", IP_B),
                ],
            })
        });
    })
    .await;

    let req = RemoveTimestampRequest {
        timestamps: vec![RemoveTimestamp {
            timestamp: 100,
            operator: TimestampOperator::Le,
        }],
    };
    let locs = fx.handler.remove_by_timestamp(&fx.ctx, req).await.unwrap();
    assert_eq!(locs.locations.len(), 2);
    assert_eq!(locs.locations[0].uuid, "vec-1");
    assert_eq!(locs.locations[0].ips, vec![IP_B]);
}

#[tokio::test]
async fn test_remove_by_timestamp_nothing_matched() {
    let fx = fixture(&[2], |local, peers| {
        local
            .expect_remove_by_timestamp()
            .returning(|_, _| Err(Status::not_found("nothing older")));
        peers[0]
            .expect_remove_by_timestamp()
            .returning(|_, _| Err(Status::not_found("nothing older")));
    })
    .await;

    let err = fx
        .handler
        .remove_by_timestamp(&fx.ctx, RemoveTimestampRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert_eq!(err.message(), "RemoveByTimestamp API target not found");
}

#[tokio::test]
async fn test_cancelled_write_reports_cancellation() {
    let fx = fixture(&[2], |local, peers| {
        local.expect_remove().returning(|_, req| local_ok(&req.id));
        peers[0]
            .expect_remove()
            .returning(|_, req| local_ok(&req.id));
    })
    .await;

    fx.ctx.cancel();
    let err = fx
        .handler
        .remove(&fx.ctx, remove_req("vec-1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Cancelled);
}

// ── Peer exchange ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_register_connects_and_replies_with_known_targets() {
    let fx = fixture(&[2], |_, _| {}).await;

    let req = MirrorTargets {
        targets: vec![
            peer(2),
            PeerTarget::from_addr(LOCAL).unwrap(),
            PeerTarget::from_addr("10.0.0.200:8081").unwrap(),
        ],
    };
    let reply = fx.handler.register(&fx.ctx, req).await.unwrap();
    assert_eq!(
        reply.targets,
        vec![PeerTarget::from_addr("10.0.0.200:8081").unwrap(), peer(2)]
    );
    assert_eq!(fx.mirror.peer_count(), 1);

    let err = fx
        .handler
        .advertise(
            &fx.ctx,
            MirrorTargets {
                targets: vec![peer(9)],
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}
