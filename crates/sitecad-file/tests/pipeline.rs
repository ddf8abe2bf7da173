//! 端到端导出：JSON 任务 → 交付包，再用各格式的读取器逐个检查包内文件

use serde_json::json;
use sitecad_file::{run_export, ExportFormat, ExportJob};
use std::collections::BTreeSet;
use std::io::{Cursor, Read};

const LAT: f64 = 46.948;
const LNG: f64 = 7.4474;

fn square(lng: f64, lat: f64, size: f64) -> serde_json::Value {
    json!([[lng, lat], [lng + size, lat], [lng + size, lat + size], [lng, lat + size], [lng, lat]])
}

/// 中心高 30 米的圆丘，角上一个缺测值
fn hill_values(n: usize) -> Vec<Option<f64>> {
    let c = (n - 1) as f64 / 2.0;
    (0..n * n)
        .map(|i| {
            if i == 0 {
                return None;
            }
            let (row, col) = ((i / n) as f64, (i % n) as f64);
            let d = ((row - c).powi(2) + (col - c).powi(2)).sqrt() / c;
            Some((30.0 * (1.0 - d)).max(0.0))
        })
        .collect()
}

fn job_json() -> serde_json::Value {
    json!({
        "manifest": {
            "site_name": "Ridge Park",
            "center_lat": LAT,
            "center_lng": LNG,
            "radius_m": 200.0,
            "requested_formats": ["cad", "scene", "exchange", "plan"],
            "units": "meters",
            "precision": 2,
            "generated_at": "2024-06-01T08:30:00Z",
            "options": { "contour_interval_m": 10.0 }
        },
        "features": {
            "buildings": [
                {
                    "id": "way/10",
                    "class": "building",
                    "geometry": { "type": "Polygon", "coordinates": square(LNG, LAT, 0.0002) },
                    "properties": { "name": "Pavilion", "building:levels": "4" }
                },
                {
                    "id": "way/11",
                    "class": "building",
                    "geometry": { "type": "Polygon", "coordinates": square(LNG - 0.0005, LAT - 0.0004, 0.0001) }
                }
            ],
            "roads": [
                {
                    "id": "way/20",
                    "class": "road",
                    "geometry": { "type": "LineString", "coordinates": [[LNG - 0.002, LAT], [LNG + 0.002, LAT + 0.0003]] }
                },
                {
                    "id": "way/21",
                    "class": "road",
                    "geometry": { "type": "LineString", "coordinates": [[LNG, LAT]] }
                }
            ],
            "landuse": [
                {
                    "id": "way/30",
                    "class": "landuse",
                    "geometry": { "type": "Polygon", "coordinates": square(LNG + 0.0006, LAT + 0.0004, 0.0004) },
                    "properties": { "landuse": "meadow" }
                }
            ]
        },
        "elevation": {
            "nx": 25,
            "ny": 25,
            "values": hill_values(25),
            "bounds": { "west": LNG - 0.003, "east": LNG + 0.003, "south": LAT - 0.002, "north": LAT + 0.002 }
        }
    })
}

fn read_entry(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> Vec<u8> {
    let mut entry = archive.by_name(name).unwrap();
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).unwrap();
    bytes
}

#[test]
fn test_job_produces_complete_package() {
    let job: ExportJob = serde_json::from_value(job_json()).unwrap();
    let result = run_export(job).unwrap();

    assert_eq!(result.records.len(), 4);
    assert_eq!(result.failed_formats().count(), 0);
    assert_eq!(result.ingestion.len(), 1);
    assert_eq!(result.ingestion[0].feature_id, "way/21");

    let package = result.package.as_ref().unwrap();
    assert_eq!(package.entry_count, 7);
    assert_eq!(package.total_bytes, package.archive_bytes.len());

    let mut archive = zip::ZipArchive::new(Cursor::new(package.archive_bytes.as_slice())).unwrap();
    let names: BTreeSet<String> = archive.file_names().map(str::to_string).collect();
    let expected: BTreeSet<String> = [
        "exports/layers.dxf",
        "exports/scene.glb",
        "exports/site_model.dae",
        "exports/plan.pdf",
        "geojson/contours.geojson",
        "README.txt",
        "metadata.json",
    ]
    .into_iter()
    .map(str::to_string)
    .collect();
    assert_eq!(names, expected);

    let dxf_bytes = read_entry(&mut archive, "exports/layers.dxf");
    let drawing = dxf::Drawing::load(&mut dxf_bytes.as_slice()).unwrap();
    let building_polylines = drawing
        .entities()
        .filter(|e| e.common.layer == "BUILDINGS")
        .filter(|e| matches!(e.specific, dxf::entities::EntityType::LwPolyline(_)))
        .count();
    assert_eq!(building_polylines, 4);
    assert!(drawing.entities().any(|e| e.common.layer == "CONTOURS"));

    let glb = read_entry(&mut archive, "exports/scene.glb");
    assert_eq!(&glb[..4], b"glTF");
    assert_eq!(u32::from_le_bytes([glb[8], glb[9], glb[10], glb[11]]) as usize, glb.len());

    let dae = String::from_utf8(read_entry(&mut archive, "exports/site_model.dae")).unwrap();
    assert!(dae.contains("<up_axis>Z_UP</up_axis>"));
    assert!(dae.contains("<title>Ridge Park</title>"));

    let pdf = read_entry(&mut archive, "exports/plan.pdf");
    assert!(pdf.starts_with(b"%PDF-1.4"));
    assert!(pdf.ends_with(b"%%EOF\n"));

    let contours: geojson::GeoJson = String::from_utf8(read_entry(&mut archive, "geojson/contours.geojson"))
        .unwrap()
        .parse()
        .unwrap();
    let geojson::GeoJson::FeatureCollection(fc) = contours else {
        panic!("contours must be a FeatureCollection");
    };
    let levels: Vec<f64> = fc
        .features
        .iter()
        .filter_map(|f| f.property("elevation").and_then(|v| v.as_f64()))
        .collect();
    assert_eq!(levels, vec![10.0, 20.0]);

    let readme = String::from_utf8(read_entry(&mut archive, "README.txt")).unwrap();
    assert!(readme.starts_with("Ridge Park\n"));
    assert!(readme.contains("Units:      Meters (2 decimal places"));

    let metadata: serde_json::Value = serde_json::from_slice(&read_entry(&mut archive, "metadata.json")).unwrap();
    assert_eq!(metadata["ingestion_skips"][0]["feature_id"], "way/21");
    assert_eq!(metadata["contours"]["levels"], 2);
}

#[test]
fn test_partial_format_request() {
    let mut value = job_json();
    value["manifest"]["requested_formats"] = json!(["scene"]);
    value["manifest"]["options"]["include_terrain"] = json!(false);
    let job: ExportJob = serde_json::from_value(value).unwrap();
    assert_eq!(job.manifest.requested_formats, BTreeSet::from([ExportFormat::Scene]));

    let result = run_export(job).unwrap();
    let package = result.package.unwrap();
    // scene.glb + contours + README + metadata
    assert_eq!(package.entry_count, 4);
    assert!(result.artifacts.iter().all(|a| !a.path.ends_with(".pdf")));
}

#[test]
fn test_invalid_manifest_is_job_fatal() {
    let mut value = job_json();
    value["manifest"]["center_lat"] = json!(123.0);
    let job: ExportJob = serde_json::from_value(value).unwrap();
    let err = run_export(job).unwrap_err();
    assert!(err.is_fatal_for_job());
}
