mod common;

use common::*;
use serde_json::{json, Value};
use trailscope::blob::{LocalBlobStore, MemoryBlobStore};
use trailscope::geoip::NoGeoIndex;
use trailscope::pipeline::{bucket_report, generate_report, GenerateReportInput};
use trailscope::sources::cloudtrail::{scan, CloudTrailImporter, Partition};
use trailscope::store::{FsReportStore, ReportId, Retention};
use trailscope::{PrincipalType, Report, TimeWindow};

fn window() -> TimeWindow {
    TimeWindow::new(utc(2025, 3, 6, 2, 25), 3600)
}

fn partition() -> Partition {
    Partition::new("AWSLogs/o-1234abcde/", ACCOUNT, REGION)
}

fn web_identity_assume_role() -> Value {
    json!({
        "eventVersion": "1.08",
        "userIdentity": {
            "type": "WebIdentityUser",
            "principalId": "arn:aws:iam::774305579662:oidc-provider/token.actions.githubusercontent.com:sts.amazonaws.com:repo:octo/app:ref:refs/heads/main",
            "userName": "repo:octo/app:ref:refs/heads/main",
            "identityProvider": "arn:aws:iam::774305579662:oidc-provider/token.actions.githubusercontent.com"
        },
        "eventTime": "2025-03-06T02:28:11Z",
        "eventSource": "sts.amazonaws.com",
        "eventName": "AssumeRoleWithWebIdentity",
        "awsRegion": "us-east-1",
        "sourceIPAddress": "52.154.133.36",
        "userAgent": "aws-sdk-nodejs/2.1112.0 linux/v20.19.0",
        "eventType": "AwsApiCall",
        "eventCategory": "Management"
    })
}

fn service_get_bucket_acl() -> Value {
    json!({
        "eventVersion": "1.11",
        "userIdentity": {
            "type": "AWSService",
            "invokedBy": "cloudtrail.amazonaws.com"
        },
        "eventTime": "2025-03-06T02:29:40Z",
        "eventSource": "s3.amazonaws.com",
        "eventName": "GetBucketAcl",
        "awsRegion": "us-east-1",
        "sourceIPAddress": "cloudtrail.amazonaws.com",
        "userAgent": "cloudtrail.amazonaws.com",
        "eventType": "AwsApiCall",
        "eventCategory": "Management"
    })
}

fn put_batch(
    store: &mut MemoryBlobStore,
    delivered_minute: u32,
    records: &[Value],
) -> (String, u64) {
    let key = object_key(
        "AWSLogs/o-1234abcde/",
        ACCOUNT,
        REGION,
        utc(2025, 3, 6, 2, delivered_minute),
    );
    let body = encode_batch(records);
    let size = body.len() as u64;
    store.put(BUCKET, key.clone(), body);
    (key, size)
}

#[test]
fn web_identity_and_service_events_make_two_principals() {
    let mut store = MemoryBlobStore::new();
    let (_, size) = put_batch(
        &mut store,
        30,
        &[web_identity_assume_role(), service_get_bucket_acl()],
    );

    let importer = CloudTrailImporter::new(&store, &NoGeoIndex, BUCKET);
    let mut report = Report::new(window());
    let outcome = importer
        .import_partition(&mut report, &partition(), None)
        .expect("import");

    assert_eq!(outcome.objects, 1);
    assert!(!outcome.truncated);
    assert!(!report.is_incomplete());
    assert_eq!(report.source_bytes(), size);
    assert_eq!(report.principals().len(), 2);
    for principal in report.principals().values() {
        assert_eq!(principal.events.len(), 1);
        let event = principal.events.values().next().unwrap();
        assert_eq!(event.count, 1);
        assert!(event.error_codes.is_empty());
    }

    let provider = "arn:aws:iam::774305579662:oidc-provider/token.actions.githubusercontent.com";
    let web = report.principal(provider).expect("web identity principal");
    assert_eq!(web.principal_type, PrincipalType::WebIdentityUser);
    assert_eq!(web.short_name(), "token.actions.githubusercontent.com");
    assert!(web.events.contains_key("sts.amazonaws.com:AssumeRoleWithWebIdentity"));

    let service = report
        .principal("cloudtrail.amazonaws.com")
        .expect("service principal");
    assert_eq!(service.principal_type, PrincipalType::Service);
    assert!(service.ip_addresses.is_empty());
}

#[test]
fn budget_stops_before_the_object_that_would_exceed_it() {
    let mut store = MemoryBlobStore::new();
    let mut sizes = Vec::new();
    let mut keys = Vec::new();
    for (minute, role) in [(30, "first"), (35, "second"), (40, "third")] {
        let event = management_event(
            &format!("2025-03-06T02:{minute}:05Z"),
            "ec2.amazonaws.com",
            "DescribeInstances",
            "203.0.113.10",
            role_session(role),
        );
        let (key, size) = put_batch(&mut store, minute, &[event]);
        keys.push(key);
        sizes.push(size);
    }
    let budget = sizes.iter().sum::<u64>() - 1;

    let importer = CloudTrailImporter::new(&store, &NoGeoIndex, BUCKET);
    let mut report = Report::new(window());
    let outcome = importer
        .import_partition(&mut report, &partition(), Some(budget))
        .expect("import");

    assert_eq!(outcome.objects, 2);
    assert!(outcome.truncated);
    assert!(report.is_incomplete());
    assert_eq!(report.source_bytes(), sizes[0] + sizes[1]);
    assert!(report.principal(&role_arn("first")).is_some());
    assert!(report.principal(&role_arn("second")).is_some());
    assert!(report.principal(&role_arn("third")).is_none());
    assert_eq!(store.fetched_keys(), keys[..2].to_vec());
}

#[test]
fn truncation_only_stops_the_current_partition() {
    let mut store = MemoryBlobStore::new();
    let big: Vec<Value> = (0..20)
        .map(|n| {
            management_event(
                &format!("2025-03-06T02:31:{n:02}Z"),
                "iam.amazonaws.com",
                &format!("ListRoles{n}"),
                &format!("203.0.113.{}", 100 + n),
                role_session("big"),
            )
        })
        .collect();
    let (_, big_size) = put_batch(&mut store, 30, &big);

    let other = Partition::new("AWSLogs/o-1234abcde/", "333333333333", REGION);
    let small = management_event(
        "2025-03-06T02:31:00Z",
        "iam.amazonaws.com",
        "ListRoles",
        "203.0.113.10",
        role_session("small"),
    );
    let small_key = object_key(
        &other.accounts_prefix,
        "333333333333",
        REGION,
        utc(2025, 3, 6, 2, 30),
    );
    let small_body = encode_batch(&[small]);
    let small_size = small_body.len() as u64;
    store.put(BUCKET, small_key, small_body);
    assert!(small_size < big_size);

    let importer = CloudTrailImporter::new(&store, &NoGeoIndex, BUCKET);
    let mut report = Report::new(window());
    let first = importer
        .import_partition(&mut report, &partition(), Some(small_size))
        .expect("import");
    let second = importer
        .import_partition(&mut report, &other, Some(small_size))
        .expect("import");

    assert!(first.truncated);
    assert_eq!(first.objects, 0);
    assert!(!second.truncated);
    assert_eq!(second.objects, 1);
    assert!(report.is_incomplete());
    assert!(report.principal(&role_arn("small")).is_some());
    assert!(report.principal(&role_arn("big")).is_none());
}

#[test]
fn out_of_window_and_data_events_leave_no_trace() {
    let mut store = MemoryBlobStore::new();
    let identity = role_session("auditor");
    let mut data_event = management_event(
        "2025-03-06T02:40:00Z",
        "s3.amazonaws.com",
        "GetObject",
        "203.0.113.10",
        identity.clone(),
    );
    data_event["eventCategory"] = json!("Data");
    let records: Vec<Value> = ["2025-03-06T02:24:59Z", "2025-03-06T03:25:00Z"]
        .into_iter()
        .map(|time| {
            management_event(
                time,
                "s3.amazonaws.com",
                "ListBuckets",
                "203.0.113.10",
                identity.clone(),
            )
        })
        .chain(std::iter::once(data_event))
        .collect();
    put_batch(&mut store, 30, &records);

    let geo = CountingGeo::default();
    let importer = CloudTrailImporter::new(&store, &geo, BUCKET);
    let mut report = Report::new(window());
    importer
        .import_partition(&mut report, &partition(), None)
        .expect("import");

    assert!(report.is_empty());
    assert_eq!(geo.lookups(), 0);

    let serialized = serde_json::to_value(&report).expect("serialize");
    let mut fields: Vec<&String> = serialized.as_object().expect("object").keys().collect();
    fields.sort();
    assert_eq!(fields, vec!["durationSeconds", "sourceBytes", "startTime"]);
}

#[test]
fn each_address_is_located_once() {
    let mut store = MemoryBlobStore::new();
    for minute in [30, 45] {
        let records: Vec<Value> = ["203.0.113.10", "198.51.100.7", "203.0.113.10", "not-an-ip"]
            .into_iter()
            .map(|ip| {
                management_event(
                    &format!("2025-03-06T02:{minute}:00Z"),
                    "kms.amazonaws.com",
                    "Decrypt",
                    ip,
                    role_session("worker"),
                )
            })
            .collect();
        put_batch(&mut store, minute, &records);
    }

    let geo = CountingGeo::default();
    let importer = CloudTrailImporter::new(&store, &geo, BUCKET);
    let mut report = Report::new(window());
    importer
        .import_partition(&mut report, &partition(), None)
        .expect("import");

    assert_eq!(geo.lookups(), 2);
    let networks = report.ip_address_networks();
    assert_eq!(networks.len(), 2);
    assert_eq!(networks["203.0.113.10"].as_deref(), Some("203.0.113.0/24"));
    assert_eq!(networks["198.51.100.7"], None);
    assert_eq!(report.network_locations().len(), 1);
    assert_eq!(report.network_locations()["203.0.113.0/24"].city_name, "Sydney");

    let worker = report.principal(&role_arn("worker")).expect("principal");
    assert_eq!(worker.ip_addresses["203.0.113.10"], 4);
    assert_eq!(worker.ip_addresses["198.51.100.7"], 2);
    assert_eq!(worker.events["kms.amazonaws.com:Decrypt"].count, 8);
}

#[test]
fn organization_and_direct_layouts_report_the_same() {
    let dir = tempfile::tempdir().expect("tempdir");
    let records = [web_identity_assume_role(), service_get_bucket_acl()];
    let body = encode_batch(&records);
    let delivered = utc(2025, 3, 6, 2, 30);
    write_local(
        dir.path(),
        "org-trail",
        &object_key("AWSLogs/o-1234abcde/", ACCOUNT, REGION, delivered),
        &body,
    );
    write_local(
        dir.path(),
        "direct-trail",
        &object_key("AWSLogs/", ACCOUNT, REGION, delivered),
        &body,
    );
    let store = LocalBlobStore::new(dir.path()).with_page_size(1);

    let mut reports = Vec::new();
    for bucket in ["org-trail", "direct-trail"] {
        let partitions = scan(&store, bucket, "").expect("scan");
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].account_id, ACCOUNT);
        assert_eq!(partitions[0].region, REGION);

        let importer = CloudTrailImporter::new(&store, &NoGeoIndex, bucket);
        let mut report = Report::new(window());
        importer
            .import_partition(&mut report, &partitions[0], None)
            .expect("import");
        reports.push(serde_json::to_value(&report).expect("serialize"));
    }

    assert_eq!(reports[0], reports[1]);
    assert_eq!(reports[0]["principals"].as_object().map(|p| p.len()), Some(2));
}

#[test]
fn bucket_report_covers_every_partition() {
    let mut store = MemoryBlobStore::new();
    put_batch(
        &mut store,
        30,
        &[management_event(
            "2025-03-06T02:31:00Z",
            "ec2.amazonaws.com",
            "RunInstances",
            "203.0.113.10",
            role_session("builder"),
        )],
    );
    let key = object_key("AWSLogs/", "444444444444", "eu-west-1", utc(2025, 3, 6, 2, 50));
    store.put(
        BUCKET,
        key,
        encode_batch(&[management_event(
            "2025-03-06T02:51:00Z",
            "ec2.amazonaws.com",
            "StopInstances",
            "203.0.113.11",
            role_session("janitor"),
        )]),
    );

    let report = bucket_report(&store, &NoGeoIndex, BUCKET, "", Some(window()), None)
        .expect("bucket report");

    assert_eq!(report.principals().len(), 2);
    assert!(report.principal(&role_arn("builder")).is_some());
    assert!(report.principal(&role_arn("janitor")).is_some());
}

#[test]
fn generated_reports_are_stored_once_per_id() {
    let mut store = MemoryBlobStore::new();
    put_batch(
        &mut store,
        30,
        &[web_identity_assume_role(), service_get_bucket_acl()],
    );
    let dir = tempfile::tempdir().expect("tempdir");
    let reports = FsReportStore::new(dir.path());
    let input = GenerateReportInput {
        report_id: ReportId::generate(),
        team_id: "t-0001".to_string(),
        bucket: BUCKET.to_string(),
        partition: partition(),
        window: window(),
        retention: Retention::TwoWeeks,
        max_source_bytes: None,
    };

    let first = generate_report(&store, &NoGeoIndex, &reports, &input)
        .expect("generate")
        .expect("stored");
    let second = generate_report(&store, &NoGeoIndex, &reports, &input)
        .expect("generate")
        .expect("stored");

    assert_eq!(first.key, format!("reports/{}.json", input.report_id));
    assert_eq!(first.tags, "team_id=t-0001&retention=2w");
    assert_eq!(first.expiration_time, utc(2025, 3, 20, 3, 25));
    assert_eq!(first.scope.account_id, ACCOUNT);
    assert_eq!(first.size, second.size);

    let body = reports
        .get_report(&input.report_id)
        .expect("read")
        .expect("body");
    assert_eq!(body.len() as u64, second.size);
    let stored: Report = serde_json::from_slice(&body).expect("report");
    assert_eq!(stored.principals().len(), 2);
    assert_eq!(
        reports.get_metadata(&input.report_id).expect("read"),
        Some(second)
    );
    let files = std::fs::read_dir(dir.path().join("reports")).expect("dir").count();
    assert_eq!(files, 2);
}

#[test]
fn empty_scopes_are_not_stored() {
    let store = MemoryBlobStore::new();
    let dir = tempfile::tempdir().expect("tempdir");
    let reports = FsReportStore::new(dir.path());
    let input = GenerateReportInput {
        report_id: ReportId::generate(),
        team_id: "t-0001".to_string(),
        bucket: BUCKET.to_string(),
        partition: partition(),
        window: window(),
        retention: Retention::OneWeek,
        max_source_bytes: Some(1),
    };

    let stored = generate_report(&store, &NoGeoIndex, &reports, &input).expect("generate");
    assert!(stored.is_none());
    assert!(!dir.path().join("reports").exists());
}
