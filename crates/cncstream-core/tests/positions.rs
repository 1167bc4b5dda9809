use cncstream_core::{CoordinateReadout, MeasurementSystem, Position};

#[test]
fn test_work_position_from_machine_and_offset() {
    let machine = CoordinateReadout::new("10.000", "5.500", "-1.000").to_position();
    let offset = Position::new(2.0, 0.5, -3.0);
    let work = machine.subtract(&offset);
    let readout = CoordinateReadout::formatted(&work, MeasurementSystem::Metric);
    assert_eq!(readout.to_string(), "8.000, 5.000, 2.000");
}

#[test]
fn test_imperial_readout_uses_four_decimals() {
    let readout =
        CoordinateReadout::formatted(&Position::new(0.1, 0.25, 1.0), MeasurementSystem::Imperial);
    assert_eq!(readout, CoordinateReadout::new("0.1000", "0.2500", "1.0000"));
    let metric = readout.to_position().to_metric(MeasurementSystem::Imperial);
    assert!((metric.x - 2.54).abs() < 1e-9);
}
